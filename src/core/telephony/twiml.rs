//! Carrier instruction documents.
//!
//! When the carrier asks what to do with an answered call, the gateway
//! replies with a small XML instruction document (TwiML) telling it to open
//! the bidirectional media stream and hold the line afterwards.

/// Instruction document connecting a call to the media-stream socket.
///
/// Renders to `<Response><Connect><Stream>…</Stream></Connect><Pause/>
/// </Response>`. Named parameters attached to the stream are echoed back by
/// the carrier as custom parameters in the stream's start event, which is how
/// per-call prompt and greeting overrides reach the relay.
///
/// # Example
///
/// ```
/// use voicebridge_gateway::core::telephony::twiml::MediaStreamTwiml;
///
/// let xml = MediaStreamTwiml::new("wss://gateway.example.com/media-stream", 120)
///     .parameter("prompt", "You are a scheduling assistant")
///     .render();
/// assert!(xml.contains("<Connect>"));
/// ```
#[derive(Debug, Clone)]
pub struct MediaStreamTwiml {
    stream_url: String,
    parameters: Vec<(String, String)>,
    pause_seconds: u64,
}

impl MediaStreamTwiml {
    /// Create an instruction document for the given stream socket URL.
    ///
    /// `pause_seconds` is the fallback hold applied if the stream ends
    /// without a hangup.
    pub fn new(stream_url: impl Into<String>, pause_seconds: u64) -> Self {
        Self {
            stream_url: stream_url.into(),
            parameters: Vec::new(),
            pause_seconds,
        }
    }

    /// Attach a named session parameter to the stream.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Attach a parameter only when a value is present.
    pub fn parameter_opt(self, name: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.parameter(name, value),
            None => self,
        }
    }

    /// Render the XML document.
    pub fn render(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push_str("<Response><Connect>");
        xml.push_str(&format!(
            r#"<Stream url="{}">"#,
            escape_xml(&self.stream_url)
        ));
        for (name, value) in &self.parameters {
            xml.push_str(&format!(
                r#"<Parameter name="{}" value="{}"/>"#,
                escape_xml(name),
                escape_xml(value)
            ));
        }
        xml.push_str("</Stream></Connect>");
        xml.push_str(&format!(r#"<Pause length="{}"/>"#, self.pause_seconds));
        xml.push_str("</Response>");
        xml
    }
}

/// Escape a string for use in XML attribute values and text.
fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
