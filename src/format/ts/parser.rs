use bytes::Bytes;
use log::{debug, trace, warn};

use super::types::*;
use crate::av::Stage;
use crate::utils::psi_crc_valid;

/// Parses 188-byte TS packets into PSI tables and elementary payloads.
///
/// PID 0 carries the PAT, which names the PMT PID; the PMT names the
/// elementary PIDs. Elementary packets that arrive before the first PMT has
/// been parsed are queued and drained as soon as the routing table exists.
/// Packets on unknown PIDs are ignored.
#[derive(Debug, Default)]
pub struct PacketParser {
    pmt_pid: Option<u16>,
    program_map: Option<ProgramMap>,
    packets_waiting_for_pmt: Vec<Bytes>,
}

struct PacketFields {
    pid: u16,
    payload_unit_start: bool,
    payload_offset: usize,
}

fn parse_packet_fields(packet: &[u8]) -> Option<PacketFields> {
    if packet.len() != TS_PACKET_SIZE || packet[0] != SYNC_BYTE {
        return None;
    }

    let payload_unit_start = packet[1] & 0x40 != 0;
    let pid = ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16;

    let mut payload_offset = TS_HEADER_SIZE;
    // Adaptation field present when the upper control bit is set.
    if (packet[3] & 0x30) >> 4 > 0x01 {
        payload_offset += packet[payload_offset] as usize + 1;
    }
    if payload_offset >= packet.len() {
        return None;
    }

    Some(PacketFields {
        pid,
        payload_unit_start,
        payload_offset,
    })
}

impl PacketParser {
    /// Creates a parser with no program information.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the PSI section within a packet payload, skipping the pointer
    /// field when this packet starts a section. `None` when the section is
    /// malformed or fails its CRC.
    fn section<'a>(&self, packet: &'a [u8], fields: &PacketFields) -> Option<&'a [u8]> {
        let mut offset = fields.payload_offset;
        if fields.payload_unit_start {
            offset += packet[offset] as usize + 1;
        }
        if offset + 3 > packet.len() {
            return None;
        }

        let data = &packet[offset..];
        let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
        let total = 3 + section_length;
        if total > data.len() {
            // Multi-packet sections are not reassembled; take what is here.
            return Some(data);
        }

        let section = &data[..total];
        if !psi_crc_valid(section) {
            warn!("dropping PSI section with bad CRC on PID {}", fields.pid);
            return None;
        }
        Some(section)
    }

    fn parse_pat(&mut self, section: &[u8]) {
        if section.len() < 12 || section[0] != TABLE_ID_PAT {
            return;
        }
        let pmt_pid = ((section[10] as u16 & 0x1F) << 8) | section[11] as u16;
        trace!("PAT: program map on PID 0x{:04x}", pmt_pid);
        self.pmt_pid = Some(pmt_pid);
    }

    fn parse_pmt(&mut self, section: &[u8]) -> Option<ProgramMap> {
        if section.len() < 12 || section[0] != TABLE_ID_PMT {
            return None;
        }
        // A section that is not yet applicable is a forward declaration;
        // ignore it until it becomes current.
        if section[5] & 0x01 == 0 {
            return None;
        }

        let section_length = ((section[1] as usize & 0x0F) << 8) | section[2] as usize;
        // The elementary stream loop ends where the CRC begins.
        let table_end = (3 + section_length).min(section.len()).saturating_sub(4);

        let program_info_length = ((section[10] as usize & 0x0F) << 8) | section[11] as usize;
        let mut offset = 12 + program_info_length;

        let mut map = ProgramMap::default();
        while offset + 5 <= table_end {
            let stream_type = section[offset];
            let pid = ((section[offset + 1] as u16 & 0x1F) << 8) | section[offset + 2] as u16;
            let es_info_length =
                ((section[offset + 3] as usize & 0x0F) << 8) | section[offset + 4] as usize;

            match stream_type {
                STREAM_TYPE_H264 if map.video_pid.is_none() => map.video_pid = Some(pid),
                STREAM_TYPE_ADTS if map.audio_pid.is_none() => map.audio_pid = Some(pid),
                STREAM_TYPE_METADATA => {
                    map.metadata_pids.insert(pid, stream_type);
                }
                other => trace!("ignoring stream type 0x{:02x} on PID 0x{:04x}", other, pid),
            }

            offset += 5 + es_info_length;
        }

        debug!(
            "PMT: video={:?} audio={:?} metadata={}",
            map.video_pid,
            map.audio_pid,
            map.metadata_pids.len()
        );
        Some(map)
    }

    fn route_elementary(&self, packet: &Bytes, fields: &PacketFields, out: &mut Vec<ParsedPacket>) {
        let map = match &self.program_map {
            Some(map) => map,
            None => return,
        };
        if let Some((kind, stream_type)) = map.lookup(fields.pid) {
            out.push(ParsedPacket::Elementary(ElementaryPayload {
                kind,
                pid: fields.pid,
                stream_type,
                payload_unit_start: fields.payload_unit_start,
                data: packet.slice(fields.payload_offset..),
            }));
        }
    }
}

impl Stage for PacketParser {
    type Input = Bytes;
    type Output = ParsedPacket;

    fn push(&mut self, input: Bytes, out: &mut Vec<ParsedPacket>) {
        let fields = match parse_packet_fields(&input) {
            Some(fields) => fields,
            None => return,
        };

        if fields.pid == PID_PAT {
            if let Some(section) = self.section(&input, &fields) {
                let section = section.to_vec();
                self.parse_pat(&section);
            }
        } else if Some(fields.pid) == self.pmt_pid {
            let map = self
                .section(&input, &fields)
                .map(|s| s.to_vec())
                .and_then(|s| self.parse_pmt(&s));
            if let Some(map) = map {
                self.program_map = Some(map.clone());
                out.push(ParsedPacket::ProgramMap(map));

                // Drain everything that arrived before the routing table.
                let waiting = std::mem::take(&mut self.packets_waiting_for_pmt);
                for packet in waiting {
                    if let Some(fields) = parse_packet_fields(&packet) {
                        self.route_elementary(&packet, &fields, out);
                    }
                }
            }
        } else if self.program_map.is_some() {
            self.route_elementary(&input, &fields, out);
        } else {
            self.packets_waiting_for_pmt.push(input);
        }
    }

    fn flush(&mut self, _out: &mut Vec<ParsedPacket>) {}

    fn reset(&mut self) {
        self.pmt_pid = None;
        self.program_map = None;
        self.packets_waiting_for_pmt.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::StreamKind;
    use crate::utils::crc32_mpeg2;
    use pretty_assertions::assert_eq;

    pub(crate) fn psi_packet(pid: u16, section: &[u8]) -> Bytes {
        let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;
        packet[3] = 0x10;
        packet[4] = 0x00; // pointer field
        packet[5..5 + section.len()].copy_from_slice(section);
        Bytes::from(packet)
    }

    pub(crate) fn pat_section(pmt_pid: u16) -> Vec<u8> {
        let mut body = vec![
            TABLE_ID_PAT,
            0xB0,
            0x0D,
            0x00,
            0x01, // transport stream id
            0xC1, // version, current/next = 1
            0x00,
            0x00, // section numbers
            0x00,
            0x01, // program number
            0xE0 | (pmt_pid >> 8) as u8,
            pmt_pid as u8,
        ];
        let crc = crc32_mpeg2(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        body
    }

    pub(crate) fn pmt_section(streams: &[(u8, u16)]) -> Vec<u8> {
        let mut body = vec![
            TABLE_ID_PMT,
            0xB0,
            0x00, // section length placeholder
            0x00,
            0x01, // program number
            0xC1, // version, current/next = 1
            0x00,
            0x00, // section numbers
            0xE1,
            0x00, // PCR PID
            0xF0,
            0x00, // program info length
        ];
        for &(stream_type, pid) in streams {
            body.push(stream_type);
            body.push(0xE0 | (pid >> 8) as u8);
            body.push(pid as u8);
            body.push(0xF0);
            body.push(0x00);
        }
        let section_length = body.len() - 3 + 4;
        body[2] = section_length as u8;
        let crc = crc32_mpeg2(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        body
    }

    fn pes_packet(pid: u16, payload_unit_start: bool, payload: &[u8]) -> Bytes {
        let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((pid >> 8) as u8 & 0x1F) | if payload_unit_start { 0x40 } else { 0 };
        packet[2] = pid as u8;
        // Use an adaptation field to stuff the packet to 188 bytes.
        let stuffing = TS_PACKET_SIZE - TS_HEADER_SIZE - payload.len();
        if stuffing > 0 {
            packet[3] = 0x30;
            packet[4] = (stuffing - 1) as u8;
            if stuffing > 1 {
                packet[5] = 0x00;
            }
        } else {
            packet[3] = 0x10;
        }
        let start = TS_PACKET_SIZE - payload.len();
        packet[start..].copy_from_slice(payload);
        Bytes::from(packet)
    }

    #[test]
    fn test_pat_then_pmt_discovers_tracks() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);
        assert!(out.is_empty());

        parser.push(
            psi_packet(
                0x1000,
                &pmt_section(&[
                    (STREAM_TYPE_H264, 0x100),
                    (STREAM_TYPE_ADTS, 0x101),
                    (STREAM_TYPE_METADATA, 0x102),
                ]),
            ),
            &mut out,
        );

        assert_eq!(out.len(), 1);
        match &out[0] {
            ParsedPacket::ProgramMap(map) => {
                assert_eq!(map.video_pid, Some(0x100));
                assert_eq!(map.audio_pid, Some(0x101));
                assert_eq!(map.metadata_pids.get(&0x102), Some(&STREAM_TYPE_METADATA));
            }
            other => panic!("expected program map, got {:?}", other),
        }
    }

    #[test]
    fn test_packets_before_pmt_are_deferred() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);
        parser.push(pes_packet(0x100, true, &[0xAA, 0xBB]), &mut out);
        assert!(out.is_empty());

        parser.push(
            psi_packet(0x1000, &pmt_section(&[(STREAM_TYPE_H264, 0x100)])),
            &mut out,
        );

        assert_eq!(out.len(), 2);
        match &out[1] {
            ParsedPacket::Elementary(payload) => {
                assert_eq!(payload.kind, StreamKind::Video);
                assert!(payload.payload_unit_start);
                assert_eq!(&payload.data[..], &[0xAA, 0xBB]);
            }
            other => panic!("expected elementary payload, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_pmt_declaration_ignored() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);

        let mut section = pmt_section(&[(STREAM_TYPE_H264, 0x100)]);
        section[5] = 0xC0; // current_next_indicator = 0
        let len = section.len();
        let crc = crc32_mpeg2(&section[..len - 4]);
        section[len - 4..].copy_from_slice(&crc.to_be_bytes());

        parser.push(psi_packet(0x1000, &section), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_corrupt_pmt_crc_dropped() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);

        let mut section = pmt_section(&[(STREAM_TYPE_H264, 0x100)]);
        section[9] ^= 0xFF; // corrupt without fixing the CRC

        parser.push(psi_packet(0x1000, &section), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_pid_ignored() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);
        parser.push(
            psi_packet(0x1000, &pmt_section(&[(STREAM_TYPE_H264, 0x100)])),
            &mut out,
        );
        out.clear();

        parser.push(pes_packet(0x555, true, &[0x01]), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_adaptation_field_skipped() {
        let mut parser = PacketParser::new();
        let mut out = Vec::new();

        parser.push(psi_packet(PID_PAT, &pat_section(0x1000)), &mut out);
        parser.push(
            psi_packet(0x1000, &pmt_section(&[(STREAM_TYPE_ADTS, 0x101)])),
            &mut out,
        );
        out.clear();

        parser.push(pes_packet(0x101, false, &[0x11, 0x22, 0x33]), &mut out);
        assert_eq!(out.len(), 1);
        match &out[0] {
            ParsedPacket::Elementary(payload) => {
                assert_eq!(payload.kind, StreamKind::Audio);
                assert_eq!(&payload.data[..], &[0x11, 0x22, 0x33]);
            }
            other => panic!("expected elementary payload, got {:?}", other),
        }
    }
}
