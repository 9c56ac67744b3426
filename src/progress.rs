//! Incremental progress markers for long sampling runs.

use std::io::{IsTerminal as _, Write};

/// Writes a compact glyph per step on a terminal and a full line otherwise.
pub struct Progress {
    tty: bool,
    out: Box<dyn Write>,
    pending_newline: bool,
}

impl Progress {
    pub fn stderr() -> Self {
        let stderr = std::io::stderr();
        Self {
            tty: stderr.is_terminal(),
            out: Box::new(stderr),
            pending_newline: false,
        }
    }

    pub fn silent() -> Self {
        Self::new(false, Box::new(std::io::sink()))
    }

    pub fn new(tty: bool, out: Box<dyn Write>) -> Self {
        Self {
            tty,
            out,
            pending_newline: false,
        }
    }

    pub fn step(&mut self, glyph: &str, line: &str) {
        let result = if self.tty {
            self.pending_newline = true;
            self.out.write_all(glyph.as_bytes())
        } else {
            writeln!(self.out, "{line}")
        };
        if result.and_then(|()| self.out.flush()).is_err() {
            tracing::debug!("progress output unavailable");
        }
    }

    /// Terminates the glyph line, if one was started.
    pub fn finish(&mut self) {
        if self.pending_newline {
            self.pending_newline = false;
            let _ = writeln!(self.out).and_then(|()| self.out.flush());
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.finish();
    }
}

/// In-memory progress sink shared between a `Progress` and the test reading it.
#[cfg(test)]
pub(crate) mod capture {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        pub(crate) fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
        }
    }
}
