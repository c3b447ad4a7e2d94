// ABOUTME: Output sinks for command results (stdout) and diagnostics (stderr)
// ABOUTME: Injectable so tests can capture exactly what each stream received

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
    interactive: bool,
}

impl Console {
    /// Process stdout/stderr. Interactive when stderr is a terminal, since
    /// that is where progress is drawn.
    pub fn stdio() -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(io::stdout()))),
            err: Arc::new(Mutex::new(Box::new(io::stderr()))),
            interactive: io::stderr().is_terminal(),
        }
    }

    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, interactive: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            err: Arc::new(Mutex::new(err)),
            interactive,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn out_line(&self, line: impl Display) {
        write_to(&self.out, format_args!("{}\n", line));
    }

    pub fn err_line(&self, line: impl Display) {
        write_to(&self.err, format_args!("{}\n", line));
    }

    /// Relays raw output without adding a newline.
    pub fn out_raw(&self, data: &str) {
        write_to(&self.out, format_args!("{}", data));
    }

    pub fn err_raw(&self, data: &str) {
        write_to(&self.err, format_args!("{}", data));
    }
}

fn write_to(sink: &Sink, args: std::fmt::Arguments<'_>) {
    // A closed stdout/stderr is not worth failing a pipeline over.
    if let Ok(mut w) = sink.lock() {
        let _ = w.write_fmt(args);
        let _ = w.flush();
    }
}
