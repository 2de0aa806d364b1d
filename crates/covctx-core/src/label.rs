//! Context labels
//!
//! A [`ContextLabel`] names whatever is running right now, e.g. `collection`
//! or `tests/test_foo.py::test_bar|setup`. "No context" is a value of its own
//! and is what a reader reports whenever the channel has nothing to say.

use crate::error::LabelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Payload that clears the context on the socket channel
pub const CLEAR_SENTINEL: &str = "[{NONE}]";

/// Payload that tells socket listeners to stop
pub const STOP_SENTINEL: &str = "[{STOP}]";

/// Label published while the test runner collects tests
pub const COLLECTION_LABEL: &str = "collection";

/// Longest label, in bytes, that fits in one socket frame
pub const MAX_LABEL_LEN: usize = 1 << 20;

/// The active context label, or "no context"
///
/// Cloning is cheap: the text is shared behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ContextLabel(Option<Arc<str>>);

impl ContextLabel {
    /// Create a label from text
    ///
    /// Empty text is "no context".
    ///
    /// # Errors
    /// - `LabelError::Reserved` if the text is one of the channel sentinels
    /// - `LabelError::TooLong` if the text exceeds [`MAX_LABEL_LEN`] bytes
    pub fn new(text: impl AsRef<str>) -> Result<Self, LabelError> {
        let text = text.as_ref();
        if is_sentinel(text) {
            return Err(LabelError::Reserved(text.to_string()));
        }
        if text.len() > MAX_LABEL_LEN {
            return Err(LabelError::TooLong {
                len: text.len(),
                max: MAX_LABEL_LEN,
            });
        }
        Ok(Self::from_payload(text))
    }

    /// "No context"
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Label for one phase of a test node
    ///
    /// Produces `<nodeid>|<phase>`.
    #[must_use]
    pub fn phase(node_id: &str, phase: TestPhase) -> Self {
        Self(Some(Arc::from(format!("{node_id}|{}", phase.as_str()))))
    }

    /// Label for the collection phase
    #[must_use]
    pub fn collection() -> Self {
        Self(Some(Arc::from(COLLECTION_LABEL)))
    }

    /// Build a label from raw channel bytes without sentinel checks
    pub(crate) fn from_payload(text: &str) -> Self {
        if text.is_empty() {
            Self(None)
        } else {
            Self(Some(Arc::from(text)))
        }
    }

    /// Label text, `None` for "no context"
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Whether this is "no context"
    #[inline]
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Whether a label is set
    #[inline]
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    /// Owned label text, `None` for "no context"
    #[must_use]
    pub fn to_option(&self) -> Option<String> {
        self.0.as_deref().map(str::to_owned)
    }
}

impl fmt::Display for ContextLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(text) => f.write_str(text),
            None => f.write_str("<no context>"),
        }
    }
}

impl TryFrom<&str> for ContextLabel {
    type Error = LabelError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        Self::new(text)
    }
}

impl TryFrom<Option<&str>> for ContextLabel {
    type Error = LabelError;

    fn try_from(text: Option<&str>) -> Result<Self, Self::Error> {
        text.map_or(Ok(Self::none()), Self::new)
    }
}

/// Whether a payload is a reserved channel sentinel
#[inline]
#[must_use]
pub fn is_sentinel(text: &str) -> bool {
    text == CLEAR_SENTINEL || text == STOP_SENTINEL
}

/// Phases of the per-test run protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    /// Run protocol for the item is starting
    Start,
    /// Fixture setup
    Setup,
    /// Test body
    Call,
    /// Fixture teardown
    Teardown,
    /// Run protocol for the item has finished
    Finish,
}

impl TestPhase {
    /// All phases in run order
    pub const ALL: [TestPhase; 5] = [
        TestPhase::Start,
        TestPhase::Setup,
        TestPhase::Call,
        TestPhase::Teardown,
        TestPhase::Finish,
    ];

    /// Suffix used in the label
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TestPhase::Start => "start",
            TestPhase::Setup => "setup",
            TestPhase::Call => "call",
            TestPhase::Teardown => "teardown",
            TestPhase::Finish => "finish",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_no_context() {
        let label = ContextLabel::new("").unwrap();
        assert!(label.is_none());
        assert_eq!(label, ContextLabel::none());
    }

    #[test]
    fn sentinels_are_rejected() {
        assert_eq!(
            ContextLabel::new(STOP_SENTINEL),
            Err(LabelError::Reserved(STOP_SENTINEL.to_string()))
        );
        assert!(ContextLabel::new(CLEAR_SENTINEL).is_err());
    }

    #[test]
    fn labels_beyond_frame_limit_are_rejected() {
        let longest = "x".repeat(MAX_LABEL_LEN);
        assert!(ContextLabel::new(&longest).is_ok());

        let oversized = "x".repeat(MAX_LABEL_LEN + 1);
        assert_eq!(
            ContextLabel::new(&oversized),
            Err(LabelError::TooLong {
                len: MAX_LABEL_LEN + 1,
                max: MAX_LABEL_LEN,
            })
        );
    }

    #[test]
    fn phase_label_format() {
        let label = ContextLabel::phase("tests/test_foo.py::test_bar", TestPhase::Setup);
        assert_eq!(label.as_str(), Some("tests/test_foo.py::test_bar|setup"));
    }

    #[test]
    fn collection_label() {
        assert_eq!(ContextLabel::collection().as_str(), Some("collection"));
    }

    #[test]
    fn try_from_option() {
        let label = ContextLabel::try_from(None::<&str>).unwrap();
        assert!(label.is_none());

        let label = ContextLabel::try_from(Some("test_x|call")).unwrap();
        assert_eq!(label.to_option().as_deref(), Some("test_x|call"));
    }

    #[test]
    fn display() {
        assert_eq!(ContextLabel::none().to_string(), "<no context>");
        assert_eq!(ContextLabel::collection().to_string(), "collection");
    }

    #[test]
    fn phases_in_run_order() {
        let names: Vec<_> = TestPhase::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, ["start", "setup", "call", "teardown", "finish"]);
    }
}
