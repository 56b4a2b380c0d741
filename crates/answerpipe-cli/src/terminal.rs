//! Terminal sinks: the answer streams to stdout, UI events go to stderr.

use answerpipe_core::{Error, Result, SearchResults, Sink, UiElement, UiStream};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Printed {
    text: String,
    finished: bool,
}

/// One turn's stdout. Both text sinks of a turn share it so a value pushed to
/// both is printed once.
#[derive(Debug, Clone, Default)]
pub struct StdoutPrinter {
    state: Arc<Mutex<Printed>>,
}

impl StdoutPrinter {
    pub fn sink(&self) -> Arc<dyn Sink> {
        Arc::new(StdoutSink {
            printer: self.clone(),
        })
    }

    fn emit(&self, value: &str) -> Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Error::SinkClosed("stdout printer poisoned".to_string()))?;
        if st.finished || value == st.text {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        let written = match value.strip_prefix(st.text.as_str()) {
            Some(suffix) => out.write_all(suffix.as_bytes()),
            // The text was replaced (e.g. by an error message): start over on a new line.
            None => out
                .write_all(b"\n")
                .and_then(|_| out.write_all(value.as_bytes())),
        };
        written
            .and_then(|_| out.flush())
            .map_err(|e| Error::SinkClosed(format!("stdout: {e}")))?;
        st.text = value.to_string();
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Error::SinkClosed("stdout printer poisoned".to_string()))?;
        if st.finished {
            return Ok(());
        }
        st.finished = true;
        if !st.text.is_empty() {
            println!();
        }
        Ok(())
    }
}

struct StdoutSink {
    printer: StdoutPrinter,
}

impl Sink for StdoutSink {
    fn update(&self, value: String) -> Result<()> {
        self.printer.emit(&value)
    }

    fn done(&self) -> Result<()> {
        self.printer.finish()
    }
}

/// Renders search progress as one line per event on stderr.
#[derive(Debug, Default)]
pub struct StderrUi;

impl UiStream for StderrUi {
    fn append(&self, element: UiElement) -> Result<()> {
        if let UiElement::AnswerSection = element {
            eprintln!("[answer]");
        }
        Ok(())
    }

    fn update(&self, element: Option<UiElement>) -> Result<()> {
        match element {
            None => eprintln!("[search] failed; continuing without results"),
            Some(UiElement::SearchSection {
                query,
                include_domains,
                results: None,
            }) => {
                if include_domains.is_empty() {
                    eprintln!("[search] {query}");
                } else {
                    eprintln!("[search] {query} (sites: {})", include_domains.join(", "));
                }
            }
            Some(UiElement::SearchSection {
                results: Some(json),
                ..
            }) => match serde_json::from_str::<SearchResults>(&json) {
                Ok(r) => eprintln!(
                    "[search] {} results, {} images",
                    r.results.len(),
                    r.images.len()
                ),
                Err(e) => tracing::debug!(error = %e, "unparseable search section"),
            },
            Some(UiElement::AnswerSection) => {}
        }
        Ok(())
    }
}
