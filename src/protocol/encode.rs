//! Protocol message encoding

use super::constants::frontend;
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};
use std::io;

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> io::Result<BytesMut> {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup messages don't have a type byte
            framed(&mut buf, None, |body| {
                body.put_i32(*version);
                for (key, value) in params {
                    put_cstr(body, key);
                    put_cstr(body, value);
                }
                body.put_u8(0);
            })?;
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| put_cstr(body, password))?;
        }
        FrontendMessage::Query(query) => {
            if query.as_bytes().contains(&0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "query contains a NUL byte",
                ));
            }
            framed(&mut buf, Some(frontend::QUERY), |body| put_cstr(body, query))?;
        }
        FrontendMessage::Terminate => {
            framed(&mut buf, Some(frontend::TERMINATE), |_| {})?;
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| {
                put_cstr(body, mechanism);
                body.put_i32(data.len() as i32);
                body.put_slice(data);
            })?;
        }
        FrontendMessage::SaslResponse { data } => {
            framed(&mut buf, Some(frontend::PASSWORD), |body| body.put_slice(data))?;
        }
    }

    Ok(buf)
}

/// Write `tag`, a length placeholder, the body, then patch the length (which counts itself)
fn framed(buf: &mut BytesMut, tag: Option<u8>, body: impl FnOnce(&mut BytesMut)) -> io::Result<()> {
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);

    body(buf);

    let len = i32::try_from(buf.len() - len_pos).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "message exceeds protocol size limit")
    })?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}
