// SPDX-License-Identifier: Apache-2.0

//! E2E wire protocol (spec.md §4.8/§6, component C9).
//!
//! Framing: `payload[iosize] || header[48 bytes]`, big-endian fields.
//! `std::io::Read::read_exact`/`Write::write_all` already loop internally
//! until the buffer is full or the connection errors, which is exactly the
//! `MSG_WAITALL` semantics spec.md asks for.

pub mod error;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

pub use error::Error;

/// Marks a normal data frame.
pub const MAGIC_DATA: u32 = 0xDEAD_BEEF;
/// Marks the final frame on a connection; the last message from a source
/// worker (spec.md §3 "E2E message header").
pub const MAGIC_EOF: u32 = 0xDEAD_BEEE;

pub const HEADER_LEN: usize = 48;

/// The trailer appended after every frame's payload (spec.md §3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E2EHeader {
    pub magic: u32,
    pub sequence: u64,
    pub sendqnum: u32,
    pub send_time_ns: u64,
    pub recv_time_ns: u64,
    pub byte_location: u64,
    pub length: u64,
}

impl E2EHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..12].copy_from_slice(&self.sequence.to_be_bytes());
        buf[12..16].copy_from_slice(&self.sendqnum.to_be_bytes());
        buf[16..24].copy_from_slice(&self.send_time_ns.to_be_bytes());
        buf[24..32].copy_from_slice(&self.recv_time_ns.to_be_bytes());
        buf[32..40].copy_from_slice(&self.byte_location.to_be_bytes());
        buf[40..48].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        E2EHeader {
            magic: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            sequence: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            sendqnum: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            send_time_ns: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            recv_time_ns: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
            byte_location: u64::from_be_bytes(buf[32..40].try_into().unwrap()),
            length: u64::from_be_bytes(buf[40..48].try_into().unwrap()),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.magic == MAGIC_EOF
    }
}

/// Source side: connect once to a destination worker's port (spec.md §4.8
/// "Connection setup").
pub fn connect_source(peer: SocketAddr, worker_index: usize) -> Result<TcpStream, Error> {
    let addr = SocketAddr::new(peer.ip(), peer.port() + worker_index as u16);
    let stream = TcpStream::connect(addr).map_err(Error::Connection)?;
    configure_socket(&stream)?;
    Ok(stream)
}

/// Destination side: bind a listening socket for one worker at `base_port +
/// worker_index` and accept its single connection.
pub fn listen_destination(bind_ip: std::net::IpAddr, base_port: u16, worker_index: usize) -> Result<TcpStream, Error> {
    let addr = SocketAddr::new(bind_ip, base_port + worker_index as u16);
    let listener = TcpListener::bind(addr).map_err(Error::Connection)?;
    let (stream, _peer) = listener.accept().map_err(Error::Connection)?;
    configure_socket(&stream)?;
    Ok(stream)
}

fn configure_socket(stream: &TcpStream) -> Result<(), Error> {
    let sock = socket2::SockRef::from(stream);
    sock.set_tcp_nodelay(true).map_err(Error::Connection)?;
    sock.set_reuse_address(true).map_err(Error::Connection)?;
    sock.set_send_buffer_size(4 * 1024 * 1024).map_err(Error::Connection)?;
    sock.set_recv_buffer_size(4 * 1024 * 1024).map_err(Error::Connection)?;
    Ok(())
}

/// Send `payload` followed by its trailer in one logical frame.
pub fn send_frame(stream: &mut TcpStream, payload: &[u8], header: &E2EHeader) -> Result<(), Error> {
    stream.write_all(payload).map_err(Error::Connection)?;
    stream.write_all(&header.encode()).map_err(Error::Connection)?;
    Ok(())
}

/// Build and send the EOF-magic frame that closes out a source worker's
/// conversation (spec.md §4.7 "E2E source extension").
pub fn send_eof(stream: &mut TcpStream, sequence: u64, sendqnum: u32, send_time_ns: u64) -> Result<(), Error> {
    let header = E2EHeader {
        magic: MAGIC_EOF,
        sequence,
        sendqnum,
        send_time_ns,
        recv_time_ns: 0,
        byte_location: 0,
        length: 0,
    };
    stream.write_all(&header.encode()).map_err(Error::Connection)
}

/// Read exactly `iosize + HEADER_LEN` bytes (`MSG_WAITALL` semantics) and
/// split into payload + decoded header.
pub fn recv_frame(stream: &mut TcpStream, iosize: usize, payload_buf: &mut [u8]) -> Result<E2EHeader, Error> {
    debug_assert!(payload_buf.len() >= iosize);
    stream.read_exact(&mut payload_buf[..iosize]).map_err(map_recv_err)?;
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).map_err(map_recv_err)?;
    let header = E2EHeader::decode(&header_buf);
    if header.magic != MAGIC_DATA && header.magic != MAGIC_EOF {
        return Err(Error::BadMagic { found: header.magic });
    }
    Ok(header)
}

fn map_recv_err(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ShortRead(e)
    } else {
        Error::Connection(e)
    }
}

/// Verify a DATA frame's header against what the destination's local
/// op-sequencing expects (spec.md §4.8: "Mismatch is a hard error").
/// `is_final_short` allows `length` to be less than `iosize` for the tail op.
pub fn verify_data_frame(header: &E2EHeader, expected_op_number: u64, iosize: u64, is_final_short: bool) -> Result<(), Error> {
    if !is_final_short && header.length != iosize {
        return Err(Error::LengthMismatch { header_length: header.length, expected: iosize });
    }
    let expected_location = expected_op_number * iosize;
    if header.byte_location != expected_location {
        return Err(Error::LocationMismatch { header_location: header.byte_location, expected: expected_location });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_wire_bytes() {
        let header = E2EHeader {
            magic: MAGIC_DATA,
            sequence: 42,
            sendqnum: 3,
            send_time_ns: 123_456,
            recv_time_ns: 654_321,
            byte_location: 65536,
            length: 65536,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(E2EHeader::decode(&bytes), header);
    }

    #[test]
    fn eof_header_has_eof_magic() {
        let header = E2EHeader { magic: MAGIC_EOF, sequence: 0, sendqnum: 0, send_time_ns: 0, recv_time_ns: 0, byte_location: 0, length: 0 };
        assert!(header.is_eof());
    }

    #[test]
    fn verify_rejects_length_mismatch() {
        let header = E2EHeader { magic: MAGIC_DATA, sequence: 0, sendqnum: 0, send_time_ns: 0, recv_time_ns: 0, byte_location: 0, length: 100 };
        let err = verify_data_frame(&header, 0, 65536, false).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
    }

    #[test]
    fn verify_accepts_short_final_frame() {
        let header = E2EHeader { magic: MAGIC_DATA, sequence: 9, sendqnum: 0, send_time_ns: 0, recv_time_ns: 0, byte_location: 9 * 65536, length: 100 };
        verify_data_frame(&header, 9, 65536, true).unwrap();
    }

    #[test]
    fn verify_rejects_location_mismatch() {
        let header = E2EHeader { magic: MAGIC_DATA, sequence: 1, sendqnum: 0, send_time_ns: 0, recv_time_ns: 0, byte_location: 999, length: 65536 };
        let err = verify_data_frame(&header, 1, 65536, false).unwrap_err();
        assert!(matches!(err, Error::LocationMismatch { .. }));
    }
}
