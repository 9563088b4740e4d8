//! Chat text fragmentation into DATA packets and reassembly.
//!
//! A message is split into 29-byte payloads, the last one zero padded.
//! Reassembly strips trailing zeros from the last payload only, so a
//! message whose length is an exact multiple of the payload size
//! round-trips unchanged.

use crate::config::NodeConfig;
use crate::types::{Data, NodeId, DATA_PAYLOAD_SIZE};

/// Split `text` into DATA packets with the given header ids and
/// consecutive sequence numbers starting at 0.
pub fn split_text<Cfg: NodeConfig>(
    text: &str,
    destination_id: NodeId,
    sender_id: NodeId,
    source_id: NodeId,
) -> Vec<Data> {
    let bytes = text.as_bytes();
    let packet_count = bytes.len().div_ceil(DATA_PAYLOAD_SIZE).max(1);

    let mut packets = Vec::with_capacity(packet_count);
    for i in 0..packet_count {
        let chunk = &bytes[i * DATA_PAYLOAD_SIZE..(bytes.len().min((i + 1) * DATA_PAYLOAD_SIZE))];
        let mut payload = [0u8; DATA_PAYLOAD_SIZE];
        payload[..chunk.len()].copy_from_slice(chunk);
        packets.push(Data {
            destination_id,
            sender_id,
            source_id,
            sequence: (i as u8) % Cfg::SEQ_COUNT,
            payload,
        });
    }
    packets
}

/// Reassemble the original text from packets in sequence order.
pub fn assemble_text(packets: &[Data]) -> String {
    let mut bytes = Vec::with_capacity(packets.len() * DATA_PAYLOAD_SIZE);
    for packet in packets {
        bytes.extend_from_slice(&packet.payload);
    }
    // Only the last payload carries padding.
    let tail_start = bytes.len().saturating_sub(DATA_PAYLOAD_SIZE);
    while bytes.len() > tail_start && bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultConfig;

    const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Proin \
        pulvinar varius lacinia. Duis at ipsum eu leo ultrices tempus. Nunc efficitur \
        semper fermentum. Ut consequat, odio et pretium luctus, libero purus congue magna, \
        vel congue justo dolor non tortor. Aliquam imperdiet id leo et iaculis. Curabitur \
        sodales nisl at augue tincidunt gravida. Sed blandit magna in neque suscipit, vitae \
        posuere lacus congue. Cras commodo urna lacus, id commodo justo laoreet vitae. \
        Proin volutpat mauris nec eros.";

    #[test]
    fn split_fills_headers_and_sequences() {
        let packets = split_text::<DefaultConfig>("hello world", 0, 1, 2);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].destination_id, 0);
        assert_eq!(packets[0].sender_id, 1);
        assert_eq!(packets[0].source_id, 2);
        assert_eq!(packets[0].sequence, 0);
    }

    #[test]
    fn long_text_wraps_the_sequence_space() {
        let text = "x".repeat(DATA_PAYLOAD_SIZE * 17);
        let packets = split_text::<DefaultConfig>(&text, 0, 1, 1);
        assert_eq!(packets.len(), 17);
        assert_eq!(packets[15].sequence, 15);
        assert_eq!(packets[16].sequence, 0);
    }

    #[test]
    fn text_roundtrip() {
        let packets = split_text::<DefaultConfig>(LOREM, 0, 1, 2);
        assert_eq!(assemble_text(&packets), LOREM);
    }

    #[test]
    fn exact_multiple_of_payload_roundtrip() {
        let text = "a".repeat(DATA_PAYLOAD_SIZE * 3);
        let packets = split_text::<DefaultConfig>(&text, 0, 1, 1);
        assert_eq!(packets.len(), 3);
        assert_eq!(assemble_text(&packets), text);
    }

    #[test]
    fn multibyte_text_roundtrip() {
        let text = "ääkköset ja emoji 🦜 yli usean paketin rajan, vielä vähän lisää tekstiä";
        let packets = split_text::<DefaultConfig>(text, 0, 3, 3);
        assert!(packets.len() > 1);
        assert_eq!(assemble_text(&packets), text);
    }
}
