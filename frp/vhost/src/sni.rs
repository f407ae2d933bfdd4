//! A from-scratch TLS ClientHello parser that reads only far enough to
//! learn the SNI server name extension. It never holds a certificate or
//! completes a handshake — the HTTPS muxer forwards the raw bytes on to
//! whichever client owns the matched name, which terminates TLS itself.

/// More bytes are needed before a verdict (match, no-SNI, not-TLS) can be
/// reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incomplete;

/// `Ok(None)` means parsing succeeded well enough to conclude this isn't a
/// TLS ClientHello carrying an SNI name (wrong record type, wrong handshake
/// type, or no `server_name` extension present). `Err(Incomplete)` means
/// try again once more bytes have arrived.
pub fn parse_sni(buf: &[u8]) -> Result<Option<String>, Incomplete> {
    if buf.len() < 5 {
        return Err(Incomplete);
    }
    if buf[0] != 0x16 {
        return Ok(None); // not a handshake record
    }
    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    if buf.len() < 5 + record_len {
        return Err(Incomplete);
    }
    let body = &buf[5..5 + record_len];

    if body.len() < 4 {
        return Err(Incomplete);
    }
    if body[0] != 0x01 {
        return Ok(None); // not a ClientHello
    }
    let hs_len = u32::from_be_bytes([0, body[1], body[2], body[3]]) as usize;
    if body.len() < 4 + hs_len {
        return Err(Incomplete);
    }
    let hello = &body[4..4 + hs_len];

    let mut pos = 2 + 32; // protocol version + random
    if hello.len() < pos + 1 {
        return Err(Incomplete);
    }
    let session_id_len = hello[pos] as usize;
    pos += 1;
    if hello.len() < pos + session_id_len + 2 {
        return Err(Incomplete);
    }
    pos += session_id_len;

    let cipher_len = u16::from_be_bytes([hello[pos], hello[pos + 1]]) as usize;
    pos += 2;
    if hello.len() < pos + cipher_len + 1 {
        return Err(Incomplete);
    }
    pos += cipher_len;

    let comp_len = hello[pos] as usize;
    pos += 1;
    if hello.len() < pos + comp_len {
        return Err(Incomplete);
    }
    pos += comp_len;

    if hello.len() < pos + 2 {
        return Ok(None); // no extensions block at all
    }
    let ext_total_len = u16::from_be_bytes([hello[pos], hello[pos + 1]]) as usize;
    pos += 2;
    if hello.len() < pos + ext_total_len {
        return Err(Incomplete);
    }

    let mut ext = &hello[pos..pos + ext_total_len];
    while ext.len() >= 4 {
        let ext_type = u16::from_be_bytes([ext[0], ext[1]]);
        let ext_len = u16::from_be_bytes([ext[2], ext[3]]) as usize;
        if ext.len() < 4 + ext_len {
            return Err(Incomplete);
        }
        let data = &ext[4..4 + ext_len];
        if ext_type == 0x0000 {
            return Ok(parse_server_name_list(data));
        }
        ext = &ext[4 + ext_len..];
    }
    Ok(None)
}

fn parse_server_name_list(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut list = &data[2..(2 + list_len).min(data.len())];
    while list.len() >= 3 {
        let name_type = list[0];
        let name_len = u16::from_be_bytes([list[1], list[2]]) as usize;
        if list.len() < 3 + name_len {
            break;
        }
        if name_type == 0 {
            return std::str::from_utf8(&list[3..3 + name_len])
                .ok()
                .map(String::from);
        }
        list = &list[3 + name_len..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello_with_sni(name: &str) -> Vec<u8> {
        let name_bytes = name.as_bytes();
        let mut server_name_entry = vec![0u8]; // name_type = host_name
        server_name_entry.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
        server_name_entry.extend_from_slice(name_bytes);

        let mut server_name_list = (server_name_entry.len() as u16).to_be_bytes().to_vec();
        server_name_list.extend_from_slice(&server_name_entry);

        let mut sni_ext = vec![0x00, 0x00]; // extension type: server_name
        sni_ext.extend_from_slice(&(server_name_list.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(&server_name_list);

        let mut extensions = sni_ext;
        let extensions_len = extensions.len() as u16;

        let mut hello = Vec::new();
        hello.extend_from_slice(&[0x03, 0x03]); // client_version
        hello.extend_from_slice(&[0u8; 32]); // random
        hello.push(0); // session_id_len
        hello.extend_from_slice(&[0x00, 0x02]); // cipher_suites_len
        hello.extend_from_slice(&[0x13, 0x01]); // one cipher suite
        hello.push(1); // compression_methods_len
        hello.push(0); // null compression
        hello.extend_from_slice(&extensions_len.to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut handshake = vec![0x01]; // ClientHello
        let hello_len = hello.len() as u32;
        handshake.extend_from_slice(&hello_len.to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni_from_well_formed_client_hello() {
        let record = client_hello_with_sni("tunnel.example.com");
        assert_eq!(
            parse_sni(&record).unwrap(),
            Some("tunnel.example.com".to_string())
        );
    }

    #[test]
    fn truncated_record_requests_more_bytes() {
        let record = client_hello_with_sni("tunnel.example.com");
        let truncated = &record[..record.len() - 10];
        assert_eq!(parse_sni(truncated), Err(Incomplete));
    }

    #[test]
    fn non_handshake_record_is_not_tls_client_hello() {
        let plain = [0x17, 0x03, 0x03, 0x00, 0x05, 1, 2, 3, 4, 5];
        assert_eq!(parse_sni(&plain), Ok(None));
    }

    #[test]
    fn too_short_to_judge_requests_more_bytes() {
        assert_eq!(parse_sni(&[0x16, 0x03]), Err(Incomplete));
    }
}
