use types::{BeaconStateError, Hash256, Slot};

#[derive(Debug)]
pub enum Error {
    SszDecodeError(ssz::DecodeError),
    BeaconStateError(BeaconStateError),
    /// The database backend reported an error.
    DBError { message: String },
    /// The database content contradicts itself: a fatal condition.
    CorruptDb(String),
    BlockNotFound(Hash256),
    NoContinuationData,
    SplitPointModified(Slot, Slot),
    UnsupportedSchemaVersion {
        software_version: u64,
        disk_version: u64,
    },
    BlockReplayError(state_processing::BlockReplayError),
    AnchorStateMissing(Hash256),
    MissingState(Hash256),
    MissingStateAtSlot(Slot),
    IoError(std::io::Error),
    InvalidKey,
    InvalidBytes,
    InvalidRecordType {
        expected: [u8; 2],
        actual: [u8; 2],
    },
    /// An e2store record carried non-zero reserved bytes.
    NonZeroReserved([u8; 2]),
    InvalidSlotIndex(String),
}

impl From<ssz::DecodeError> for Error {
    fn from(e: ssz::DecodeError) -> Error {
        Error::SszDecodeError(e)
    }
}

impl From<BeaconStateError> for Error {
    fn from(e: BeaconStateError) -> Error {
        Error::BeaconStateError(e)
    }
}

impl From<state_processing::BlockReplayError> for Error {
    fn from(e: state_processing::BlockReplayError) -> Error {
        Error::BlockReplayError(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::IoError(e)
    }
}
