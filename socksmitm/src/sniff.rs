use crate::error::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of sniffing the first bytes of a freshly CONNECT-ed stream.
pub struct Sniffed {
    /// The bytes actually read off the wire — must be re-injected ahead of
    /// anything read afterwards; they are consumed from the socket for real,
    /// never a non-destructive peek.
    pub prefix: Vec<u8>,
    pub is_tls: bool,
    /// `Some(hostname)` when `is_tls` and a SNI extension was present.
    pub sni: Option<String>,
}

/// Read one byte and decide whether the session is opening a TLS handshake.
///
/// A lone leading `0x16` (TLS `ContentType::Handshake`) is the full signal
/// per the component design; everything else is treated as plain TCP and
/// passed through unmodified. When it is a handshake, pull in the rest of
/// the ClientHello record so SNI can be extracted before a leaf certificate
/// is minted.
pub async fn sniff<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Sniffed> {
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await?;

    if first[0] != 0x16 {
        return Ok(Sniffed {
            prefix: first.to_vec(),
            is_tls: false,
            sni: None,
        });
    }

    // TLS record header: already-read type(1) + version(2) + length(2).
    let mut rest_of_header = [0u8; 4];
    stream.read_exact(&mut rest_of_header).await?;
    let record_len = u16::from_be_bytes([rest_of_header[2], rest_of_header[3]]) as usize;

    let mut record_body = vec![0u8; record_len];
    stream.read_exact(&mut record_body).await?;

    let mut prefix = Vec::with_capacity(5 + record_len);
    prefix.push(first[0]);
    prefix.extend_from_slice(&rest_of_header);
    prefix.extend_from_slice(&record_body);

    let sni = extract_sni_from_handshake(&record_body);

    Ok(Sniffed {
        prefix,
        is_tls: true,
        sni,
    })
}

/// Parse SNI out of a ClientHello handshake message (the record body, i.e.
/// everything after the 5-byte TLS record header).
fn extract_sni_from_handshake(handshake: &[u8]) -> Option<String> {
    if handshake.is_empty() || handshake[0] != 0x01 {
        return None; // not a ClientHello
    }

    let hs_len = u32::from_be_bytes([0, handshake[1], handshake[2], handshake[3]]) as usize;
    let client_hello = &handshake[4..handshake.len().min(4 + hs_len)];

    if client_hello.len() < 34 {
        return None;
    }

    let mut pos = 34; // version(2) + random(32)

    if pos >= client_hello.len() {
        return None;
    }
    let session_id_len = client_hello[pos] as usize;
    pos += 1 + session_id_len;

    if pos + 2 > client_hello.len() {
        return None;
    }
    let cipher_suites_len =
        u16::from_be_bytes([client_hello[pos], client_hello[pos + 1]]) as usize;
    pos += 2 + cipher_suites_len;

    if pos >= client_hello.len() {
        return None;
    }
    let compression_len = client_hello[pos] as usize;
    pos += 1 + compression_len;

    if pos + 2 > client_hello.len() {
        return None;
    }
    let extensions_len =
        u16::from_be_bytes([client_hello[pos], client_hello[pos + 1]]) as usize;
    pos += 2;

    let extensions_end = pos + extensions_len.min(client_hello.len() - pos);

    while pos + 4 <= extensions_end {
        let ext_type = u16::from_be_bytes([client_hello[pos], client_hello[pos + 1]]);
        let ext_len = u16::from_be_bytes([client_hello[pos + 2], client_hello[pos + 3]]) as usize;
        pos += 4;

        if ext_type == 0x0000 {
            if ext_len >= 5 && pos + ext_len <= extensions_end {
                let name_type = client_hello[pos + 2];
                if name_type == 0x00 {
                    let name_len =
                        u16::from_be_bytes([client_hello[pos + 3], client_hello[pos + 4]]) as usize;
                    if pos + 5 + name_len <= extensions_end {
                        let name = &client_hello[pos + 5..pos + 5 + name_len];
                        return String::from_utf8(name.to_vec()).ok();
                    }
                }
            }
            return None;
        }

        pos += ext_len;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn non_tls_prefix_is_single_byte_and_reinjectable() {
        let mut stream = Cursor::new(b"GET / HTTP/1.1\r\n".to_vec());
        let sniffed = sniff(&mut stream).await.unwrap();
        assert!(!sniffed.is_tls);
        assert_eq!(sniffed.prefix, vec![b'G']);
        assert_eq!(sniffed.sni, None);
    }

    #[test]
    fn extract_sni_none_for_garbage() {
        assert_eq!(extract_sni_from_handshake(b""), None);
        assert_eq!(extract_sni_from_handshake(&[0x02, 0, 0, 0]), None);
    }
}
