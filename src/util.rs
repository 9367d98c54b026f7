use std::{io::ErrorKind, path::Path};

use rustix::{
    fs::{statat, AtFlags, CWD},
    io::{Errno, Result as ErrnoResult},
};

pub(crate) trait ErrnoFilter<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>>;
}

impl<T> ErrnoFilter<T> for ErrnoResult<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err == ignored => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Same idea as [`ErrnoFilter`], for `std::io` results.
pub(crate) trait NotFoundFilter<T> {
    fn filter_not_found(self) -> std::io::Result<Option<T>>;
}

impl<T> NotFoundFilter<T> for std::io::Result<T> {
    fn filter_not_found(self) -> std::io::Result<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Returns the size of the file at `path`, or `None` if nothing is there.
///
/// Symlinks are followed.  Any failure other than ENOENT is returned.
pub(crate) fn file_size(path: &Path) -> std::io::Result<Option<u64>> {
    let stat = statat(CWD, path, AtFlags::empty()).filter_errno(Errno::NOENT)?;
    Ok(stat.map(|stat| stat.st_size as u64))
}
