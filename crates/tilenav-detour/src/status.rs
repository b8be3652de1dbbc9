//! Status codes for navmesh operations

use tilenav_common::Error;

/// Failure reasons reported by the navmesh and its queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Provided parameter was invalid
    InvalidParam,
    /// No free tile slot or polygon id space left
    OutOfMemory,
    /// Navigation mesh data is invalid
    NavMeshInvalid,
    /// A tile already occupies the location
    AlreadyExists,
    /// Value does not exist or is not found
    NotFound,
    /// Tile coordinates are outside the representable range
    TileOutOfBounds,
    /// Input data is corrupted or invalid
    DataCorrupted,
    /// Data has the wrong magic number
    WrongMagic,
    /// Data has the wrong version
    WrongVersion,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::InvalidParam => write!(f, "Invalid parameter"),
            Status::OutOfMemory => write!(f, "Out of memory"),
            Status::NavMeshInvalid => write!(f, "Invalid navigation mesh"),
            Status::AlreadyExists => write!(f, "Value already exists"),
            Status::NotFound => write!(f, "Value not found"),
            Status::TileOutOfBounds => write!(f, "Tile out of bounds"),
            Status::DataCorrupted => write!(f, "Data corrupted"),
            Status::WrongMagic => write!(f, "Wrong magic number"),
            Status::WrongVersion => write!(f, "Wrong version"),
        }
    }
}

impl std::error::Error for Status {}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status {
            Status::DataCorrupted | Status::WrongMagic | Status::WrongVersion => {
                Error::CorruptData(status.to_string())
            }
            _ => Error::Detour(status.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_error_kind() {
        assert!(matches!(Error::from(Status::WrongMagic), Error::CorruptData(_)));
        assert!(matches!(Error::from(Status::NotFound), Error::Detour(_)));
    }
}
