//! Envelope import from JSON.

/// Import envelope from JSON bytes.
pub fn from_json(bytes: &[u8]) -> crate::types::Result<super::Envelope> {
    serde_json::from_slice(bytes).map_err(|e| crate::types::Error::validation(e.to_string()))
}

/// Import envelope from a `serde_json::Value`, as loaded from a `CheckpointStore`.
pub fn from_value(value: serde_json::Value) -> crate::types::Result<super::Envelope> {
    serde_json::from_value(value).map_err(|e| crate::types::Error::validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::export;
    use crate::envelope::Envelope;

    #[test]
    fn round_trips_through_value() {
        let envelope = Envelope::new(
            crate::types::UserId::must("u1"),
            crate::types::SessionId::must("s1"),
            "hello",
            vec!["a".to_string()],
            10,
            10,
            10,
        );
        let value = export::to_value(&envelope).unwrap();
        let back = from_value(value).unwrap();
        assert_eq!(back.identity.envelope_id, envelope.identity.envelope_id);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(from_json(b"not json").is_err());
    }
}
