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

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls::ClientConfig;

use super::socket::{BufTcpStream, Transport};
use super::{Connection, TcpConnection};
use crate::address_::Address;
use crate::error::{DriverError, Result};
use crate::time::Instant;

const MAGIC_PREAMBLE: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];
// four 32-bit big-endian proposals, most preferred first, zero-padded
const VERSION_PROPOSALS: [[u8; 4]; 4] = [
    [0, 0, 4, 4], // Bolt 4.4
    [0, 0, 3, 4], // Bolt 4.3
    [0, 0, 2, 4], // Bolt 4.2
    [0, 0, 0, 0],
];

/// Open a TCP connection to `address`, optionally wrap it in TLS, and
/// perform the Bolt handshake: the magic preamble followed by the version
/// proposals, answered by the server's pick.
pub(crate) fn open(
    address: Arc<Address>,
    deadline: Option<Instant>,
    connect_timeout: Option<Duration>,
    tls: Option<Arc<ClientConfig>>,
) -> Result<TcpConnection> {
    debug!("C: <OPEN> {address}");
    let socket = DriverError::wrap_connect(establish(&address, deadline, connect_timeout))?;
    let local_port = socket.local_addr().map(|addr| addr.port()).unwrap_or(0);

    // the whole exchange below runs under the remaining time budget
    set_handshake_timeout(&socket, deadline).map_err(|err| {
        let _ = socket.shutdown(Shutdown::Both);
        err
    })?;

    let mut transport = Transport::new(
        BufTcpStream::new(&socket)?,
        address.unresolved_host(),
        tls,
    )?;
    let version = match exchange_versions(&mut transport, local_port) {
        Ok(version) => version,
        Err(err) => {
            debug!("[#{local_port:04X}] closing socket, handshake failed: {err}");
            let _ = socket.shutdown(Shutdown::Both);
            return Err(err);
        }
    };

    // the per-operation deadline handling takes over from here
    let _ = socket.set_read_timeout(None);
    let _ = socket.set_write_timeout(None);

    Ok(Connection::new(
        version,
        transport,
        Some(socket),
        Some(local_port),
        address,
    ))
}

fn establish(
    address: &Address,
    deadline: Option<Instant>,
    connect_timeout: Option<Duration>,
) -> std::io::Result<TcpStream> {
    let budget = |deadline: Option<Instant>| {
        let left = deadline.map(|deadline| deadline.remaining().max(Duration::from_nanos(1)));
        match (connect_timeout, left) {
            (None, None) => None,
            (Some(timeout), None) => Some(timeout),
            (None, Some(left)) => Some(left),
            (Some(timeout), Some(left)) => Some(timeout.min(left)),
        }
    };

    let Some(_) = budget(deadline) else {
        return TcpStream::connect(address);
    };
    // with a budget, every candidate socket address gets its own try
    let mut last_err = None;
    for sock_addr in address.to_socket_addrs()? {
        let timeout = budget(deadline).expect("budget cannot disappear");
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(socket) => return Ok(socket),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )
    }))
}

fn set_handshake_timeout(socket: &TcpStream, deadline: Option<Instant>) -> Result<()> {
    let timeout = deadline.map(|deadline| deadline.remaining().max(Duration::from_nanos(1)));
    socket
        .set_read_timeout(timeout)
        .and_then(|_| socket.set_write_timeout(timeout))
        .map_err(|err| DriverError::InvalidConfig {
            message: format!("failed to configure socket timeout: {err}"),
        })
}

fn exchange_versions(transport: &mut impl ReadWrite, local_port: u16) -> Result<(u8, u8)> {
    debug!("[#{local_port:04X}] C: <HANDSHAKE> {MAGIC_PREAMBLE:02X?}");
    DriverError::wrap_write(transport.write_all(&MAGIC_PREAMBLE))?;
    debug!("[#{local_port:04X}] C: <BOLT> {VERSION_PROPOSALS:02X?}");
    for proposal in &VERSION_PROPOSALS {
        DriverError::wrap_write(transport.write_all(proposal))?;
    }
    DriverError::wrap_write(transport.flush())?;

    let mut answer = [0_u8; 4];
    DriverError::wrap_read(transport.read_exact(&mut answer))?;
    debug!("[#{local_port:04X}] S: <BOLT> {answer:02X?}");
    accept_version(answer)
}

trait ReadWrite: Read + Write {}
impl<T: Read + Write> ReadWrite for T {}

fn accept_version(answer: [u8; 4]) -> Result<(u8, u8)> {
    // the leading two bytes would carry range/padding information; only the
    // (minor, major) pair decides
    match (answer, answer[2], answer[3]) {
        ([0, 0, 0, 0], _, _) => Err(DriverError::InvalidConfig {
            message: String::from("server version not supported"),
        }),
        (_, minor @ 2..=4, 4) => Ok((4, minor)),
        ([b'H', b'T', b'T', b'P'], _, _) => Err(DriverError::InvalidConfig {
            message: format!(
                "unexpected server handshake response {answer:?} (looks like HTTP)"
            ),
        }),
        _ => Err(DriverError::InvalidConfig {
            message: format!("unexpected server handshake response {answer:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case([0, 0, 4, 4], (4, 4))]
    #[case([0, 0, 3, 4], (4, 3))]
    #[case([0, 0, 2, 4], (4, 2))]
    fn test_accept_offered_versions(
        #[case] mut answer: [u8; 4],
        #[case] expected: (u8, u8),
        #[values([0, 0], [1, 2], [255, 254])] garbage: [u8; 2],
    ) {
        answer[0..2].copy_from_slice(&garbage);
        assert_eq!(accept_version(answer).unwrap(), expected);
    }

    #[test]
    fn test_reject_no_common_version() {
        let res = accept_version([0, 0, 0, 0]);
        let Err(DriverError::InvalidConfig { message }) = res else {
            panic!("expected InvalidConfig error, got {res:?}");
        };
        assert!(message.contains("server version not supported"));
    }

    #[test]
    fn test_reject_http_server() {
        let res = accept_version(*b"HTTP");
        let Err(DriverError::InvalidConfig { message }) = res else {
            panic!("expected InvalidConfig error, got {res:?}");
        };
        assert!(message.contains("looks like HTTP"));
    }

    #[rstest]
    #[case([0, 0, 0, 1])] // not offered: 1.0
    #[case([0, 0, 0, 2])] // not offered: 2.0
    #[case([0, 0, 0, 3])] // not offered: 3.0
    #[case([0, 0, 0, 4])] // not offered: 4.0
    #[case([0, 0, 1, 4])] // not offered: 4.1
    #[case([0, 0, 0, 5])] // not offered: 5.0
    #[case([0, 0, 0, 6])] // not offered: 6.0
    fn test_reject_unoffered_versions(
        #[case] mut answer: [u8; 4],
        #[values([0, 0], [1, 2], [255, 254])] garbage: [u8; 2],
    ) {
        answer[0..2].copy_from_slice(&garbage);
        let res = accept_version(answer);
        let Err(DriverError::InvalidConfig { message }) = res else {
            panic!("expected InvalidConfig error, got {res:?}");
        };
        assert!(message.contains("unexpected server handshake response"));
    }
}
