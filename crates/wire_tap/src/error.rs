// SPDX-FileCopyrightText: 2023 Jade Lovelace
//
// SPDX-License-Identifier: MPL-2.0

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The kernel or the device refused an interface flag or hardware
    /// timestamping request.
    #[error("interface configuration: {0}: {1}")]
    Configuration(&'static str, Errno),
    /// A ring socket option or the mapping of the ring failed.
    #[error("ring setup: {0}: {1}")]
    RingSetup(&'static str, Errno),
    #[error("ring setup: bad geometry: {0}")]
    RingGeometry(String),
    #[error("{0}: {1}")]
    Errno(&'static str, Errno),
    #[error("{0}: {1}")]
    IoError(&'static str, std::io::Error),
    #[error("{0}")]
    StringError(&'static str),
}

impl Error {
    /// Whether this failure belongs to the ring path, i.e. retrying on the
    /// legacy receive path may still work.
    pub fn is_ring_setup(&self) -> bool {
        matches!(self, Error::RingSetup(..) | Error::RingGeometry(_))
    }
}

pub(crate) trait AddContext<T> {
    fn context(self, s: &'static str) -> Result<T, Error>;
    fn config_context(self, s: &'static str) -> Result<T, Error>;
    fn ring_context(self, s: &'static str) -> Result<T, Error>;
}

impl<T> AddContext<T> for Result<T, Errno> {
    fn context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::Errno(s, e))
    }

    fn config_context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::Configuration(s, e))
    }

    fn ring_context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::RingSetup(s, e))
    }
}

impl<T> AddContext<T> for Result<T, std::io::Error> {
    fn context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::IoError(s, e))
    }

    fn config_context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::Configuration(s, io_errno(&e)))
    }

    fn ring_context(self, s: &'static str) -> Result<T, Error> {
        self.map_err(|e| Error::RingSetup(s, io_errno(&e)))
    }
}

fn io_errno(e: &std::io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_i32).unwrap_or(Errno::UnknownErrno)
}

pub(crate) fn err(s: &'static str) -> Error {
    Error::StringError(s)
}
