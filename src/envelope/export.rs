//! Envelope export to JSON.
//!
//! Infallible serialization using serde; the only failure mode is a
//! `serde_json` internal error, which would indicate a bug in `Envelope`'s
//! derived implementation rather than bad input.

/// Export envelope to JSON bytes.
pub fn to_json(envelope: &super::Envelope) -> crate::types::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|e| crate::types::Error::internal(e.to_string()))
}

/// Export envelope to a `serde_json::Value`, as stored by a `CheckpointStore`.
pub fn to_value(envelope: &super::Envelope) -> crate::types::Result<serde_json::Value> {
    serde_json::to_value(envelope).map_err(|e| crate::types::Error::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn round_trips_through_bytes() {
        let envelope = Envelope::new(
            crate::types::UserId::must("u1"),
            crate::types::SessionId::must("s1"),
            "hello",
            vec!["a".to_string()],
            10,
            10,
            10,
        );
        let bytes = to_json(&envelope).unwrap();
        let back: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.identity.envelope_id, envelope.identity.envelope_id);
    }
}
