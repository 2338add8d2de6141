// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{BufReader, BufWriter, Read, Result as IoResult, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, ServerName, StreamOwned};

use crate::error::{DriverError, Result};

/// Split buffered views of one TCP socket, so reads and writes can be
/// buffered independently while sharing the underlying file descriptor.
#[derive(Debug)]
pub(crate) struct BufTcpStream {
    read: BufReader<TcpStream>,
    write: BufWriter<TcpStream>,
}

impl BufTcpStream {
    pub(super) fn new(socket: &TcpStream) -> Result<Self> {
        Ok(Self {
            read: BufReader::new(DriverError::wrap_connect(socket.try_clone())?),
            write: BufWriter::new(DriverError::wrap_connect(socket.try_clone())?),
        })
    }
}

impl Read for BufTcpStream {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.read.read(buf)
    }

    #[inline]
    fn read_exact(&mut self, buf: &mut [u8]) -> IoResult<()> {
        self.read.read_exact(buf)
    }
}

impl Write for BufTcpStream {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.write.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> IoResult<()> {
        self.write.flush()
    }

    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> IoResult<()> {
        self.write.write_all(buf)
    }
}

/// The connection's transport: the stream as-is, or wrapped in TLS.
#[derive(Debug)]
pub(crate) enum Transport<T: Read + Write> {
    Plain(T),
    Secure(Box<StreamOwned<ClientConnection, T>>),
}

// every IO call forwards to whichever variant is live
macro_rules! forward_io {
    ($self:ident, $io:ident => $call:expr) => {
        match $self {
            Transport::Plain($io) => $call,
            Transport::Secure($io) => $call,
        }
    };
}

impl<T: Read + Write> Transport<T> {
    pub(super) fn new(io: T, host_name: &str, tls: Option<Arc<ClientConfig>>) -> Result<Self> {
        let Some(tls) = tls else {
            return Ok(Self::Plain(io));
        };
        let server_name =
            ServerName::try_from(host_name).map_err(|err| DriverError::InvalidConfig {
                message: format!("tls refused hostname {host_name}: {err}"),
            })?;
        let tls_connection =
            ClientConnection::new(tls, server_name).map_err(|err| DriverError::InvalidConfig {
                message: format!("failed to initialize tls stream: {err}"),
            })?;
        Ok(Self::Secure(Box::new(StreamOwned::new(tls_connection, io))))
    }
}

impl<T: Read + Write> Read for Transport<T> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        forward_io!(self, io => io.read(buf))
    }

    #[inline]
    fn read_exact(&mut self, buf: &mut [u8]) -> IoResult<()> {
        forward_io!(self, io => io.read_exact(buf))
    }
}

impl<T: Read + Write> Write for Transport<T> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        forward_io!(self, io => io.write(buf))
    }

    #[inline]
    fn flush(&mut self) -> IoResult<()> {
        forward_io!(self, io => io.flush())
    }

    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> IoResult<()> {
        forward_io!(self, io => io.write_all(buf))
    }
}
