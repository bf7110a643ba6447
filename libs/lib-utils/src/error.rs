pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Env(String),
    B64(crate::b64::Error),
}

impl From<crate::b64::Error> for Error {
    fn from(error: crate::b64::Error) -> Self {
        Error::B64(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
