//! NATS subject helpers (channel-token safe)

use std::borrow::Cow;

/// Normalizes identifiers to be subject-safe (replace spaces, trim).
fn norm<S: AsRef<str>>(s: S) -> Cow<'static, str> {
    let mut t = s
        .as_ref()
        .trim()
        .replace([' ', '\t', '\n', '\r', '*', '>', '/', '.'], "-");
    if t.is_empty() {
        t = "unknown".into();
    }
    Cow::Owned(t)
}

/// Ack updates for one channel.
///
/// ```
/// use gup_core::ack_subject;
///
/// assert_eq!(ack_subject("tok 1"), "gupshup.ack.tok-1");
/// ```
pub fn ack_subject(channel_token: &str) -> String {
    format!("gupshup.ack.{}", norm(channel_token))
}

/// Dead-letter records for a failed pipeline stage.
///
/// ```
/// use gup_core::dlq_subject;
///
/// assert_eq!(dlq_subject("tok", "media"), "gupshup.dlq.tok.media");
/// assert_eq!(dlq_subject("", "ack"), "gupshup.dlq.unknown.ack");
/// ```
pub fn dlq_subject(channel_token: &str, stage: &str) -> String {
    format!("gupshup.dlq.{}.{}", norm(channel_token), norm(stage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_cannot_leak_into_subjects() {
        assert_eq!(ack_subject("a.*>"), "gupshup.ack.a---");
    }
}
