//! Access-log configuration.

use crate::format::DEFAULT_TEMPLATE;

/// Options for a [`Mux`](crate::Mux).
///
/// ```rust
/// use reclog::Config;
///
/// let config = Config::default()
///     .with_template("%mtd% %uri% -> %rescode%")
///     .with_request_body(true);
/// assert!(config.capture_request_body);
/// assert!(!config.capture_response_body);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Access-line template. Empty disables access logging.
    pub template: String,
    /// Read request bodies eagerly so `%reqbody%` can print them.
    pub capture_request_body: bool,
    /// Keep a copy of the first response write for `%resbody%`.
    pub capture_response_body: bool,
}

impl Config {
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_request_body(mut self, capture: bool) -> Self {
        self.capture_request_body = capture;
        self
    }

    pub fn with_response_body(mut self, capture: bool) -> Self {
        self.capture_response_body = capture;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_owned(),
            capture_request_body: false,
            capture_response_body: false,
        }
    }
}
