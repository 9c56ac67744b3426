use anyhow::Result;
use procmetrics::CommandOutput;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    /// JSON mode keeps stdout machine-readable and echoes the human lines on stderr.
    pub fn print_output(&self, output: &CommandOutput) -> Result<()> {
        if self.json {
            for line in &output.human {
                eprintln!("{line}");
            }
            println!("{}", serde_json::to_string(&output.document)?);
            return Ok(());
        }

        let mut out = String::new();
        for line in &output.human {
            // Top-level entries stand out; nested phases stay plain.
            if line.starts_with(' ') {
                out.push_str(&format!("{line}\n"));
            } else {
                out.push_str(&format!("{}\n", self.style(line, "37;1")));
            }
        }
        println!("{}", out.trim_end());

        let excluded = output.document["excludedSamples"].as_u64().unwrap_or(0);
        if excluded > 0 {
            self.print_warning(&format!("{excluded} sample(s) excluded; rerun with --verbose for details"));
        }
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    pub fn print_warning(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "warning",
                "code": "warning",
                "message": msg,
            });
            eprintln!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("warn", "33;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}
