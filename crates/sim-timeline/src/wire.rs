//! Encoding of cross-worker event buffers.
//!
//! The transport ships opaque bytes; this is the kernel's buffer format.
//! Nothing about it is wire-level standardized, only the collectives'
//! semantics are.

use sim_events::WireEvent;

pub(crate) fn encode_buffer(events: &[WireEvent]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(events)
}

pub(crate) fn decode_buffer(bytes: &[u8]) -> Result<Vec<WireEvent>, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buffer_survives_the_trip() {
        let events = vec![WireEvent {
            time: 1500,
            priority: 3,
            owner: "router_7".into(),
            method: "receive_qubit".into(),
            args: vec![json!("photon-12"), json!(0.85)],
        }];
        let decoded = decode_buffer(&encode_buffer(&events).unwrap()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].owner, "router_7");
        assert_eq!(decoded[0].args[1], json!(0.85));
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        assert!(decode_buffer(&[]).unwrap().is_empty());
    }
}
