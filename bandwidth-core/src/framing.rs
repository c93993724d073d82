//! Length-prefixed packet metadata records.
//!
//! Each record is an unsigned LEB128 length followed by that many bytes of
//! bincode-encoded [`PacketMetadata`]. The prefix is at most five bytes and
//! must fit in a `u32`.

use crate::classify::{mac_octets, DecodedPacket, LayerType};
use crate::error::FrameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::IpAddr;

/// Longest valid length prefix
pub const MAX_PREFIX_BYTES: usize = 5;

/// Largest body accepted by [`FrameReader`]
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Tag and header size of one recorded layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub layer_type: LayerType,
    pub size: u32,
}

/// Summary of one captured packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub capture_time: DateTime<Utc>,
    pub total_size: u32,
    /// Link, network and transport layers, by position in the packet
    pub layers: [Option<LayerMetadata>; 3],
    pub src_mac: Option<[u8; 6]>,
    pub dst_mac: Option<[u8; 6]>,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl PacketMetadata {
    /// Summarize a decoded packet. Decode-error layers leave their slot empty.
    pub fn from_packet(packet: &DecodedPacket, capture_time: DateTime<Utc>) -> Self {
        let mut metadata = Self {
            capture_time,
            total_size: clamp_u32(packet.wire_len),
            layers: [None; 3],
            src_mac: None,
            dst_mac: None,
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: None,
        };

        for (index, layer) in packet.layers.iter().take(3).enumerate() {
            if layer.is_decode_error() {
                continue;
            }
            metadata.layers[index] = Some(LayerMetadata {
                layer_type: layer.layer_type,
                size: clamp_u32(layer.header_len),
            });

            match index {
                0 => {
                    if let Some((src, dst)) = layer.link_addrs() {
                        metadata.src_mac = Some(mac_octets(src));
                        metadata.dst_mac = Some(mac_octets(dst));
                    }
                }
                1 => {
                    if let Some((src, dst)) = layer.ip_addrs() {
                        metadata.src_ip = Some(src);
                        metadata.dst_ip = Some(dst);
                    }
                }
                _ => {
                    if let Some((src, dst)) = layer.ports() {
                        metadata.src_port = Some(src);
                        metadata.dst_port = Some(dst);
                    }
                }
            }
        }

        metadata
    }

    /// Bytes above the link layer header
    pub fn layer2_plus(&self) -> u64 {
        let link = self.layers[0].map(|l| l.size).unwrap_or(0);
        u64::from(self.total_size.saturating_sub(link))
    }
}

fn clamp_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Append the LEB128 encoding of `value` to `out`
pub fn encode_len(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Read one length prefix. `Ok(None)` means the stream ended cleanly before it.
pub fn read_len<R: Read>(reader: &mut R) -> Result<Option<u32>, FrameError> {
    let mut value: u64 = 0;
    for index in 0..MAX_PREFIX_BYTES {
        let mut byte = [0u8; 1];
        if let Err(e) = reader.read_exact(&mut byte) {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof if index == 0 => Ok(None),
                io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated {
                    expected: index + 1,
                    actual: index,
                }),
                _ => Err(e.into()),
            };
        }

        value |= u64::from(byte[0] & 0x7f) << (7 * index);
        if byte[0] & 0x80 == 0 {
            return u32::try_from(value)
                .map(Some)
                .map_err(|_| FrameError::ExcessiveByteCount);
        }
    }
    Err(FrameError::ExcessiveByteCount)
}

pub struct FrameWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    /// Write one record, returning the number of bytes written
    pub fn write(&mut self, metadata: &PacketMetadata) -> Result<usize, FrameError> {
        let body = bincode::serialize(metadata)?;
        let len = u32::try_from(body.len())
            .map_err(|_| FrameError::FrameTooLarge(u32::MAX, MAX_FRAME_LEN))?;

        self.buffer.clear();
        encode_len(len, &mut self.buffer);
        self.buffer.extend_from_slice(&body);
        self.inner.write_all(&self.buffer)?;
        Ok(self.buffer.len())
    }

    pub fn flush(&mut self) -> Result<(), FrameError> {
        Ok(self.inner.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next raw record body, `None` at a clean end of stream
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let len = match read_len(&mut self.inner)? {
            Some(len) => len,
            None => return Ok(None),
        };
        if len > MAX_FRAME_LEN {
            return Err(FrameError::FrameTooLarge(len, MAX_FRAME_LEN));
        }

        let mut body = Vec::with_capacity(len as usize);
        let read = (&mut self.inner).take(u64::from(len)).read_to_end(&mut body)?;
        if read < len as usize {
            return Err(FrameError::Truncated {
                expected: len as usize,
                actual: read,
            });
        }
        Ok(Some(body))
    }

    /// Next decoded record, `None` at a clean end of stream
    pub fn next_record(&mut self) -> Result<Option<PacketMetadata>, FrameError> {
        match self.next_frame()? {
            Some(body) => decode_body(&body).map(Some),
            None => Ok(None),
        }
    }
}

pub fn decode_body(body: &[u8]) -> Result<PacketMetadata, FrameError> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Layer;
    use chrono::TimeZone;
    use pnet::util::MacAddr;
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    fn sample(total: usize) -> PacketMetadata {
        let packet = DecodedPacket::new(
            total,
            vec![
                Layer::ethernet(14, MacAddr(2, 0, 0, 0, 0, 1), MacAddr(2, 0, 0, 0, 0, 2)),
                Layer::ipv4(20, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)),
                Layer::udp(8, 5000, 53),
            ],
        );
        PacketMetadata::from_packet(&packet, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_leb128_encoding() {
        let mut out = Vec::new();
        encode_len(300, &mut out);
        assert_eq!(out, vec![0xac, 0x02]);

        out.clear();
        encode_len(u32::MAX, &mut out);
        assert_eq!(out.len(), MAX_PREFIX_BYTES);
        assert_eq!(read_len(&mut Cursor::new(out)).unwrap(), Some(u32::MAX));
    }

    #[test]
    fn test_prefix_longer_than_five_bytes_is_rejected() {
        let mut data = Cursor::new(vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(read_len(&mut data), Err(FrameError::ExcessiveByteCount)));
    }

    #[test]
    fn test_prefix_overflowing_u32_is_rejected() {
        let mut data = Cursor::new(vec![0xff, 0xff, 0xff, 0xff, 0x1f]);
        assert!(matches!(read_len(&mut data), Err(FrameError::ExcessiveByteCount)));
    }

    #[test]
    fn test_records_are_read_back_in_order() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write(&sample(100)).unwrap();
        writer.write(&sample(1500)).unwrap();

        let mut reader = FrameReader::new(Cursor::new(writer.into_inner()));
        assert_eq!(reader.next_record().unwrap(), Some(sample(100)));
        assert_eq!(reader.next_record().unwrap(), Some(sample(1500)));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write(&sample(100)).unwrap();
        let mut data = writer.into_inner();
        data.pop();

        let mut reader = FrameReader::new(Cursor::new(data));
        assert!(matches!(reader.next_frame(), Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_prefix_is_an_error() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x80]));
        assert!(matches!(
            reader.next_frame(),
            Err(FrameError::Truncated { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut data = Vec::new();
        encode_len(MAX_FRAME_LEN + 1, &mut data);
        let mut reader = FrameReader::new(Cursor::new(data));
        assert!(matches!(reader.next_frame(), Err(FrameError::FrameTooLarge(_, _))));
    }

    #[test]
    fn test_metadata_summarizes_packet() {
        let metadata = sample(100);
        assert_eq!(metadata.total_size, 100);
        assert_eq!(metadata.layer2_plus(), 86);
        assert_eq!(metadata.src_mac, Some([2, 0, 0, 0, 0, 1]));
        assert_eq!(metadata.dst_port, Some(53));
        assert_eq!(
            metadata.layers[1],
            Some(LayerMetadata {
                layer_type: LayerType::Ipv4,
                size: 20
            })
        );
    }

    #[test]
    fn test_decode_error_layers_are_skipped() {
        let packet = DecodedPacket::new(
            64,
            vec![
                Layer::ethernet(14, MacAddr(2, 0, 0, 0, 0, 1), MacAddr(2, 0, 0, 0, 0, 2)),
                Layer::decode_error(),
            ],
        );
        let metadata = PacketMetadata::from_packet(&packet, Utc::now());
        assert!(metadata.layers[0].is_some());
        assert!(metadata.layers[1].is_none());
        assert_eq!(metadata.layer2_plus(), 50);
    }
}
