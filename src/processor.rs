use std::fmt;
use std::str::{self, Utf8Error};

use tracing::warn;

/// Sent back instead of a report when the payload is not valid UTF-8.
pub const UNDECODABLE_MESSAGE: &str = "There was an error while processing the file.\nPlease check if the file is decodable using utf-8.\n";

/// Turns a request payload into the text sent back to the client.
///
/// Implementations never fail: problems with the payload itself are reported to the client as
/// text. Transport errors are handled by the caller.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, payload: &[u8]) -> String;
}

impl<F> Processor for F
where
    F: Fn(&[u8]) -> String + Send + Sync + 'static,
{
    fn process(&self, payload: &[u8]) -> String {
        self(payload)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub lowercase: usize,
    pub uppercase: usize,
}

impl Report {
    pub fn total(&self) -> usize {
        self.lowercase + self.uppercase
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lowercase: {}\nUppercase: {}\nTotal: {}",
            self.lowercase,
            self.uppercase,
            self.total()
        )
    }
}

/// Counts lowercase and uppercase characters of a UTF-8 payload. Anything else (digits,
/// whitespace, punctuation, caseless scripts) is ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct LetterCount;

impl LetterCount {
    pub fn count(payload: &[u8]) -> Result<Report, Utf8Error> {
        let text = str::from_utf8(payload)?;

        let report = text.chars().fold(Report::default(), |mut report, c| {
            if c.is_lowercase() {
                report.lowercase += 1;
            } else if c.is_uppercase() {
                report.uppercase += 1;
            }
            report
        });

        Ok(report)
    }
}

impl Processor for LetterCount {
    fn process(&self, payload: &[u8]) -> String {
        match LetterCount::count(payload) {
            Ok(report) => report.to_string(),
            Err(e) => {
                warn!(error = %e, "There was an error while processing the data");
                UNDECODABLE_MESSAGE.to_string()
            }
        }
    }
}
