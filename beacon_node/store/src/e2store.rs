//! Reader and writer for the "e2store" append-only archival container and the `.era` layout
//! built on it.
//!
//! An e2store file is a sequence of type-length-value records: a 2-byte type, a 4-byte
//! little-endian length and 2 reserved bytes that must be zero. An era file is a group of
//! records:
//!
//! ```text
//! era := Version | block* | era-state | slot-index(block)? | slot-index(state)
//! ```
//!
//! Slot indices store absolute file offsets (8-byte little-endian), with `0` marking a skip
//! slot. The final 8 bytes of an index record hold the entry count, enabling backward scans
//! from the end of the file.

use crate::Error;
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;
use ssz::{Decode, Encode};
use std::io::{Read, Seek, SeekFrom, Write};
use types::consts::SLOTS_PER_HISTORICAL_ROOT;
use types::{BeaconState, Hash256, SignedBeaconBlock, Slot};

/// Record type: file version. The payload is empty; the 8 header bytes form the magic
/// `0x65 0x32 0x00 0x00 0x00 0x00 0x00 0x00`.
pub const VERSION_TYPE: [u8; 2] = [0x65, 0x32];
/// Record type: snappy-framed SSZ `SignedBeaconBlock`.
pub const COMPRESSED_SIGNED_BEACON_BLOCK_TYPE: [u8; 2] = [0x01, 0x00];
/// Record type: snappy-framed SSZ `BeaconState`.
pub const COMPRESSED_BEACON_STATE_TYPE: [u8; 2] = [0x02, 0x00];
/// Record type: slot index.
pub const SLOT_INDEX_TYPE: [u8; 2] = [0x69, 0x32];

pub const HEADER_SIZE: u64 = 8;

/// The number of slots covered by one era file.
pub const SLOTS_PER_ERA: u64 = SLOTS_PER_HISTORICAL_ROOT;

/// A parsed TLV header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub record_type: [u8; 2],
    pub length: u32,
}

impl RecordHeader {
    fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..2].copy_from_slice(&self.record_type);
        bytes[2..6].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: [u8; 8]) -> Result<Self, Error> {
        // Reserved bytes must be zero; anything else indicates a corrupt or future-format
        // file.
        if bytes[6] != 0 || bytes[7] != 0 {
            return Err(Error::NonZeroReserved([bytes[6], bytes[7]]));
        }
        Ok(Self {
            record_type: [bytes[0], bytes[1]],
            length: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        })
    }
}

/// A slot index: the file offsets of `count` consecutive slots starting at `start_slot`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotIndex {
    pub start_slot: Slot,
    /// Absolute file position of the record for each slot; 0 for skip slots.
    pub offsets: Vec<u64>,
}

impl SlotIndex {
    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8 * (self.offsets.len() + 2));
        payload.extend_from_slice(&(self.start_slot.as_u64() as i64).to_le_bytes());
        for offset in &self.offsets {
            payload.extend_from_slice(&(*offset as i64).to_le_bytes());
        }
        payload.extend_from_slice(&(self.offsets.len() as i64).to_le_bytes());
        payload
    }

    fn from_payload(payload: &[u8]) -> Result<Self, Error> {
        if payload.len() < 16 || payload.len() % 8 != 0 {
            return Err(Error::InvalidSlotIndex(format!(
                "bad payload length {}",
                payload.len()
            )));
        }
        let read_i64 = |chunk: &[u8]| i64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));

        let count = read_i64(&payload[payload.len() - 8..]) as usize;
        if payload.len() != 8 * (count + 2) {
            return Err(Error::InvalidSlotIndex(format!(
                "count {} disagrees with length {}",
                count,
                payload.len()
            )));
        }
        let start_slot = Slot::new(read_i64(&payload[..8]) as u64);
        let offsets = payload[8..payload.len() - 8]
            .chunks_exact(8)
            .map(|chunk| read_i64(chunk) as u64)
            .collect();
        Ok(Self {
            start_slot,
            offsets,
        })
    }

    /// Total size of the serialized record, header included.
    fn record_size(count: usize) -> u64 {
        HEADER_SIZE + 8 * (count as u64 + 2)
    }
}

fn snappy_compress(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = FrameEncoder::new(Vec::new());
    encoder.write_all(bytes)?;
    encoder
        .into_inner()
        .map_err(|e| Error::DBError {
            message: format!("snappy flush failed: {e:?}"),
        })
}

fn snappy_decompress(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoder = FrameDecoder::new(bytes);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// The canonical basename of an era file: `<config>-<era number>-<short root>.era`.
pub fn era_file_name(config_name: &str, era_number: u64, era_root: Hash256) -> String {
    format!(
        "{config_name}-{era_number:05}-{}.era",
        &hex::encode(era_root.as_slice())[..8]
    )
}

/// Append-only writer for one era file.
pub struct EraWriter<W: Write + Seek> {
    writer: W,
    start_slot: Slot,
    block_offsets: Vec<u64>,
    state_offset: Option<(Slot, u64)>,
}

impl<W: Write + Seek> EraWriter<W> {
    /// Begin a new era group covering block slots `[start_slot, start_slot + SLOTS_PER_ERA)`.
    pub fn new(mut writer: W, start_slot: Slot) -> Result<Self, Error> {
        Self::write_record(&mut writer, VERSION_TYPE, &[])?;
        Ok(Self {
            writer,
            start_slot,
            block_offsets: vec![],
            state_offset: None,
        })
    }

    fn write_record(writer: &mut W, record_type: [u8; 2], payload: &[u8]) -> Result<u64, Error> {
        let offset = writer.stream_position()?;
        let header = RecordHeader {
            record_type,
            length: payload.len() as u32,
        };
        writer.write_all(&header.to_bytes())?;
        writer.write_all(payload)?;
        Ok(offset)
    }

    /// Append the block for the next slot. Skip slots between the last appended block and
    /// `slot` are recorded as zero offsets.
    pub fn append_block(&mut self, slot: Slot, block: &SignedBeaconBlock) -> Result<(), Error> {
        let expected_index = slot
            .as_u64()
            .checked_sub(self.start_slot.as_u64())
            .ok_or_else(|| Error::InvalidSlotIndex("block slot before era start".into()))?
            as usize;
        // Zero-fill skip slots.
        while self.block_offsets.len() < expected_index {
            self.block_offsets.push(0);
        }

        let compressed = snappy_compress(&block.as_ssz_bytes())?;
        let offset = Self::write_record(
            &mut self.writer,
            COMPRESSED_SIGNED_BEACON_BLOCK_TYPE,
            &compressed,
        )?;
        self.block_offsets.push(offset);
        Ok(())
    }

    /// Append the era boundary state.
    pub fn write_state(&mut self, slot: Slot, state: &BeaconState) -> Result<(), Error> {
        let compressed = snappy_compress(&state.as_ssz_bytes())?;
        let offset = Self::write_record(&mut self.writer, COMPRESSED_BEACON_STATE_TYPE, &compressed)?;
        self.state_offset = Some((slot, offset));
        Ok(())
    }

    /// Write the block and state indices and return the underlying writer.
    pub fn finish(mut self) -> Result<W, Error> {
        let (state_slot, state_offset) = self
            .state_offset
            .ok_or_else(|| Error::InvalidSlotIndex("era file requires a state".into()))?;

        if !self.block_offsets.is_empty() {
            let block_index = SlotIndex {
                start_slot: self.start_slot,
                offsets: std::mem::take(&mut self.block_offsets),
            };
            Self::write_record(&mut self.writer, SLOT_INDEX_TYPE, &block_index.payload())?;
        }

        let state_index = SlotIndex {
            start_slot: state_slot,
            offsets: vec![state_offset],
        };
        Self::write_record(&mut self.writer, SLOT_INDEX_TYPE, &state_index.payload())?;

        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Random-access reader for one era file.
pub struct EraReader<R: Read + Seek> {
    reader: R,
    block_index: Option<SlotIndex>,
    state_index: SlotIndex,
}

impl<R: Read + Seek> EraReader<R> {
    /// Open an era file, validating the version magic and locating the indices by backward
    /// scan from the end.
    pub fn open(mut reader: R) -> Result<Self, Error> {
        let version_header = Self::read_header(&mut reader, 0)?;
        if version_header.record_type != VERSION_TYPE {
            return Err(Error::InvalidRecordType {
                expected: VERSION_TYPE,
                actual: version_header.record_type,
            });
        }

        let file_len = reader.seek(SeekFrom::End(0))?;

        // The state index is the last record; its trailing 8 bytes are its count.
        let state_index = Self::read_index_ending_at(&mut reader, file_len)?;
        let state_index_start = file_len - SlotIndex::record_size(state_index.offsets.len());

        // The block index, if present, ends where the state index starts.
        let block_index = if state_index_start > HEADER_SIZE {
            match Self::read_index_ending_at(&mut reader, state_index_start) {
                Ok(index) => Some(index),
                Err(_) => None,
            }
        } else {
            None
        };

        Ok(Self {
            reader,
            block_index,
            state_index,
        })
    }

    fn read_index_ending_at(reader: &mut R, end: u64) -> Result<SlotIndex, Error> {
        if end < HEADER_SIZE + 16 {
            return Err(Error::InvalidSlotIndex("file too short".into()));
        }
        // Read the trailing count.
        reader.seek(SeekFrom::Start(end - 8))?;
        let mut count_bytes = [0u8; 8];
        reader.read_exact(&mut count_bytes)?;
        let count = i64::from_le_bytes(count_bytes);
        if count < 0 || count as u64 > SLOTS_PER_ERA {
            return Err(Error::InvalidSlotIndex(format!("implausible count {count}")));
        }

        let record_size = SlotIndex::record_size(count as usize);
        let record_start = end
            .checked_sub(record_size)
            .ok_or_else(|| Error::InvalidSlotIndex("index overruns file start".into()))?;

        let header = Self::read_header(reader, record_start)?;
        if header.record_type != SLOT_INDEX_TYPE {
            return Err(Error::InvalidRecordType {
                expected: SLOT_INDEX_TYPE,
                actual: header.record_type,
            });
        }
        let payload = Self::read_payload(reader, record_start, header.length as usize)?;
        SlotIndex::from_payload(&payload)
    }

    fn read_header(reader: &mut R, offset: u64) -> Result<RecordHeader, Error> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut bytes = [0u8; 8];
        reader.read_exact(&mut bytes)?;
        RecordHeader::from_bytes(bytes)
    }

    fn read_payload(reader: &mut R, record_offset: u64, length: usize) -> Result<Vec<u8>, Error> {
        reader.seek(SeekFrom::Start(record_offset + HEADER_SIZE))?;
        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload)?;
        Ok(payload)
    }

    fn read_compressed_record(
        &mut self,
        offset: u64,
        expected_type: [u8; 2],
    ) -> Result<Vec<u8>, Error> {
        let header = Self::read_header(&mut self.reader, offset)?;
        if header.record_type != expected_type {
            return Err(Error::InvalidRecordType {
                expected: expected_type,
                actual: header.record_type,
            });
        }
        let payload = Self::read_payload(&mut self.reader, offset, header.length as usize)?;
        snappy_decompress(&payload)
    }

    pub fn block_index(&self) -> Option<&SlotIndex> {
        self.block_index.as_ref()
    }

    pub fn state_index(&self) -> &SlotIndex {
        &self.state_index
    }

    /// The slot of the era boundary state.
    pub fn state_slot(&self) -> Slot {
        self.state_index.start_slot
    }

    /// The era number of this file.
    pub fn era_number(&self) -> u64 {
        self.state_slot().as_u64() / SLOTS_PER_ERA
    }

    /// Read the era boundary state.
    pub fn read_state(&mut self) -> Result<BeaconState, Error> {
        let offset = *self
            .state_index
            .offsets
            .first()
            .ok_or_else(|| Error::InvalidSlotIndex("empty state index".into()))?;
        let bytes = self.read_compressed_record(offset, COMPRESSED_BEACON_STATE_TYPE)?;
        BeaconState::from_ssz_bytes(&bytes).map_err(Into::into)
    }

    /// Read the block at `slot`, or `None` for a skip slot.
    pub fn read_block(&mut self, slot: Slot) -> Result<Option<SignedBeaconBlock>, Error> {
        let Some(block_index) = self.block_index.clone() else {
            return Ok(None);
        };
        let index = match slot.as_u64().checked_sub(block_index.start_slot.as_u64()) {
            Some(index) if (index as usize) < block_index.offsets.len() => index as usize,
            _ => return Ok(None),
        };
        let offset = block_index.offsets[index];
        if offset == 0 {
            // Skip slot.
            return Ok(None);
        }
        let bytes = self.read_compressed_record(offset, COMPRESSED_SIGNED_BEACON_BLOCK_TYPE)?;
        SignedBeaconBlock::from_ssz_bytes(&bytes)
            .map(Some)
            .map_err(Into::into)
    }

    /// Read every block in the era, in slot order, skipping empty slots.
    pub fn read_all_blocks(&mut self) -> Result<Vec<(Slot, SignedBeaconBlock)>, Error> {
        let Some(block_index) = self.block_index.clone() else {
            return Ok(vec![]);
        };
        let mut blocks = Vec::new();
        for (i, _) in block_index
            .offsets
            .iter()
            .enumerate()
            .filter(|(_, offset)| **offset != 0)
        {
            let slot = block_index.start_slot + i as u64;
            if let Some(block) = self.read_block(slot)? {
                blocks.push((slot, block));
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use std::io::Cursor;
    use types::{BeaconBlock, ChainSpec, FixedBytesExtended};

    fn test_block(slot: u64) -> SignedBeaconBlock {
        let mut block = BeaconBlock::empty();
        block.slot = Slot::new(slot);
        SignedBeaconBlock::from_block(block, Signature::empty())
    }

    fn test_state(slot: u64) -> BeaconState {
        let pubkeys = vec![types::PublicKeyBytes::empty(); 2];
        let mut state =
            state_processing::genesis::interop_genesis_state(&pubkeys, 0, &ChainSpec::mainnet())
                .expect("genesis state");
        state.slot = Slot::new(slot);
        state
    }

    #[test]
    fn era_round_trip_with_skip_slots() {
        let start_slot = Slot::new(8192);
        let mut writer = EraWriter::new(Cursor::new(Vec::new()), start_slot).unwrap();

        // Blocks at 8192, 8194; 8193 is a skip slot.
        let block_a = test_block(8192);
        let block_b = test_block(8194);
        writer.append_block(Slot::new(8192), &block_a).unwrap();
        writer.append_block(Slot::new(8194), &block_b).unwrap();

        let state = test_state(16384);
        writer.write_state(Slot::new(16384), &state).unwrap();

        let cursor = writer.finish().unwrap();
        let bytes = cursor.into_inner();

        // The file begins with the version magic.
        assert_eq!(&bytes[..8], &[0x65, 0x32, 0, 0, 0, 0, 0, 0]);

        let mut reader = EraReader::open(Cursor::new(bytes.clone())).unwrap();
        assert_eq!(reader.state_slot(), Slot::new(16384));
        assert_eq!(reader.era_number(), 2);

        // Blocks compare byte-equal after the round trip.
        assert_eq!(
            reader.read_block(Slot::new(8192)).unwrap().unwrap(),
            block_a
        );
        assert_eq!(reader.read_block(Slot::new(8193)).unwrap(), None);
        assert_eq!(
            reader.read_block(Slot::new(8194)).unwrap().unwrap(),
            block_b
        );
        assert_eq!(reader.read_state().unwrap(), state);

        // Rewriting the same content produces an identical file.
        let mut rewriter = EraWriter::new(Cursor::new(Vec::new()), start_slot).unwrap();
        for (slot, block) in reader.read_all_blocks().unwrap() {
            rewriter.append_block(slot, &block).unwrap();
        }
        rewriter.write_state(Slot::new(16384), &state).unwrap();
        let rewritten = rewriter.finish().unwrap().into_inner();
        assert_eq!(rewritten, bytes);
    }

    #[test]
    fn non_zero_reserved_bytes_are_rejected() {
        let mut writer = EraWriter::new(Cursor::new(Vec::new()), Slot::new(0)).unwrap();
        writer.write_state(Slot::new(0), &test_state(0)).unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();
        // Corrupt the reserved bytes of the version header.
        bytes[6] = 0xff;
        assert!(matches!(
            EraReader::open(Cursor::new(bytes)),
            Err(Error::NonZeroReserved(_))
        ));
    }

    #[test]
    fn era_file_name_format() {
        let root = Hash256::from_low_u64_be(0xabcdef);
        let name = era_file_name("mainnet", 1506, root);
        assert!(name.starts_with("mainnet-01506-"));
        assert!(name.ends_with(".era"));
    }
}
