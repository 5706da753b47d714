use std::error::Error;
use std::fmt;
use std::io;

/// Errors produced by the outbound write path.
///
/// The first error latched by a connection (see `SocketOutput::on_write_completed`) is
/// cloned into every producer promise completed afterwards, so this type must be
/// `Clone` even though `io::Error` is not.
#[derive(Debug)]
pub enum SocketOutputError {
    /// The underlying async write or shutdown request failed. Latched into
    /// `last_write_error` and reported to every subsequent producer.
    Write(io::Error),

    /// `EventLoop::post` failed synchronously, e.g. because the loop is shutting down.
    Scheduling(String),
}

impl fmt::Display for SocketOutputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SocketOutputError::Write(ref e) => write!(f, "write failed: {}", e),
            SocketOutputError::Scheduling(ref msg) => {
                write!(f, "could not schedule write: {}", msg)
            }
        }
    }
}

impl Error for SocketOutputError {
    fn description(&self) -> &str {
        match *self {
            SocketOutputError::Write(_) => "write failed",
            SocketOutputError::Scheduling(_) => "could not schedule write",
        }
    }

    fn cause(&self) -> Option<&Error> {
        match *self {
            SocketOutputError::Write(ref e) => Some(e),
            SocketOutputError::Scheduling(_) => None,
        }
    }
}

impl From<io::Error> for SocketOutputError {
    fn from(e: io::Error) -> SocketOutputError {
        SocketOutputError::Write(e)
    }
}

impl Clone for SocketOutputError {
    fn clone(&self) -> SocketOutputError {
        match *self {
            SocketOutputError::Write(ref e) => {
                SocketOutputError::Write(io::Error::new(e.kind(), e.to_string()))
            }
            SocketOutputError::Scheduling(ref msg) => {
                SocketOutputError::Scheduling(msg.clone())
            }
        }
    }
}
