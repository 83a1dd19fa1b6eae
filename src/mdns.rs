//! mDNS wire format: labels, resource records, query parsing, response
//! building. Only the subset a service responder needs.

use std::io::{Cursor, Read, Write};

use anyhow::{bail, Result};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const QTYPE_ANY: u16 = 0xff;

pub fn encode_label(label: &str, out: &mut Vec<u8>) -> Result<()> {
    for seg in label.split(".") {
        if seg.is_empty() {
            continue;
        }
        let bytes = seg.as_bytes();
        out.write_u8(bytes.len() as u8)?;
        out.write_all(bytes)?;
    }
    out.write_u8(0)?;
    Ok(())
}

// Compression pointers come from untrusted packets; chains longer than
// this are rejected so a pointer loop cannot recurse unboundedly.
const MAX_POINTER_HOPS: u8 = 8;

fn read_label(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<String> {
    read_label_inner(data, cursor, 0)
}

fn read_label_inner(data: &[u8], cursor: &mut Cursor<&[u8]>, hops: u8) -> Result<String> {
    let mut out = Vec::new();
    loop {
        let n = cursor.read_u8()?;
        if n == 0 {
            break;
        } else if n & 0xc0 == 0xc0 {
            if hops >= MAX_POINTER_HOPS {
                bail!("label pointer chain too deep");
            }
            let off = (((n & 0x3f) as usize) << 8) | cursor.read_u8()? as usize;
            if off >= data.len() {
                bail!("label pointer past end of packet");
            }
            let frag = read_label_inner(data, &mut Cursor::new(&data[off..]), hops + 1)?;
            out.extend_from_slice(frag.as_bytes());
            break;
        } else {
            let mut b = vec![0; n as usize];
            cursor.read_exact(&mut b)?;
            out.extend_from_slice(&b);
            out.extend_from_slice(b".");
        }
    }
    Ok(std::str::from_utf8(&out)?.to_owned())
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RR {
    pub name: String,
    pub typ: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

#[derive(Debug, Eq, PartialEq)]
pub struct Query {
    pub name: String,
    pub typ: u16,
    pub class: u16,
}

#[derive(Debug, Eq, PartialEq)]
pub struct DnsMessage {
    pub source: std::net::SocketAddr,
    pub transaction: u16,
    pub flags: u16,
    pub queries: Vec<Query>,
    pub answers: Vec<RR>,
}

impl DnsMessage {
    pub fn is_response(&self) -> bool {
        self.flags & 0x8000 != 0
    }
}

fn parse_rr(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<RR> {
    let name = read_label(data, cursor)?;
    let typ = cursor.read_u16::<BigEndian>()?;
    let class = cursor.read_u16::<BigEndian>()?;
    let ttl = cursor.read_u32::<BigEndian>()?;
    let dlen = cursor.read_u16::<BigEndian>()?;
    let mut rdata = vec![0; dlen as usize];
    cursor.read_exact(&mut rdata)?;

    Ok(RR {
        name,
        typ,
        class,
        ttl,
        rdata,
    })
}

fn parse_q(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<Query> {
    let name = read_label(data, cursor)?;
    let typ = cursor.read_u16::<BigEndian>()?;
    let class = cursor.read_u16::<BigEndian>()?;

    Ok(Query { name, typ, class })
}

/// Parse a DNS packet. Authority and additional sections are consumed but a
/// responder has no use for them, so only queries and answers are kept.
pub fn parse_dns(data: &[u8], source: std::net::SocketAddr) -> Result<DnsMessage> {
    let mut cursor = Cursor::new(data);
    let transaction = cursor.read_u16::<BigEndian>()?;
    let flags = cursor.read_u16::<BigEndian>()?;
    let nquestions = cursor.read_u16::<BigEndian>()?;
    let nanswers = cursor.read_u16::<BigEndian>()?;
    let nauthority = cursor.read_u16::<BigEndian>()?;
    let nadditional = cursor.read_u16::<BigEndian>()?;

    let mut queries = Vec::new();
    let mut answers = Vec::new();

    for _ in 0..nquestions {
        queries.push(parse_q(data, &mut cursor)?);
    }
    for _ in 0..nanswers {
        answers.push(parse_rr(data, &mut cursor)?);
    }
    for _ in 0..(nauthority as usize + nadditional as usize) {
        let _ = parse_rr(data, &mut cursor)?;
    }

    Ok(DnsMessage {
        source,
        transaction,
        flags,
        queries,
        answers,
    })
}

fn encode_rr(rr: &RR, out: &mut Vec<u8>) -> Result<()> {
    encode_label(&rr.name, out)?;
    out.write_u16::<BigEndian>(rr.typ)?;
    out.write_u16::<BigEndian>(rr.class)?;
    out.write_u32::<BigEndian>(rr.ttl)?;
    out.write_u16::<BigEndian>(rr.rdata.len() as u16)?;
    out.extend_from_slice(&rr.rdata);
    Ok(())
}

/// Build an authoritative mDNS response packet.
pub fn build_response(answers: &[RR], additional: &[RR]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(512);
    out.write_u16::<BigEndian>(0)?; // transaction id
    out.write_u16::<BigEndian>(0x8400)?; // flags: response, authoritative
    out.write_u16::<BigEndian>(0)?; // questions
    out.write_u16::<BigEndian>(answers.len() as u16)?;
    out.write_u16::<BigEndian>(0)?; // authority
    out.write_u16::<BigEndian>(additional.len() as u16)?;

    for rr in answers {
        encode_rr(rr, &mut out)?;
    }
    for rr in additional {
        encode_rr(rr, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip() {
        let mut buf = Vec::new();
        encode_label("_matter._tcp.local", &mut buf).unwrap();
        let label = read_label(&buf, &mut Cursor::new(buf.as_slice())).unwrap();
        assert_eq!(label, "_matter._tcp.local.");
    }

    #[test]
    fn test_response_roundtrip() {
        let answers = vec![RR {
            name: "_matter._tcp.local.".to_owned(),
            typ: TYPE_PTR,
            class: 1,
            ttl: 4500,
            rdata: {
                let mut b = Vec::new();
                encode_label("bridge._matter._tcp.local", &mut b).unwrap();
                b
            },
        }];
        let additional = vec![RR {
            name: "gw.local.".to_owned(),
            typ: TYPE_A,
            class: 1,
            ttl: 4500,
            rdata: vec![192, 168, 1, 2],
        }];
        let packet = build_response(&answers, &additional).unwrap();
        let source = "127.0.0.1:5353".parse().unwrap();
        let msg = parse_dns(&packet, source).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.queries.len(), 0);
        assert_eq!(msg.answers.len(), 1);
        assert_eq!(msg.answers[0].name, "_matter._tcp.local.");
        assert_eq!(msg.answers[0].typ, TYPE_PTR);
    }

    fn query_with_name_bytes(name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u16::<BigEndian>(0).unwrap(); // transaction
        out.write_u16::<BigEndian>(0).unwrap(); // flags
        out.write_u16::<BigEndian>(1).unwrap(); // questions
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.extend_from_slice(name);
        out.write_u16::<BigEndian>(TYPE_PTR).unwrap();
        out.write_u16::<BigEndian>(1).unwrap();
        out
    }

    #[test]
    fn test_pointer_past_end_rejected() {
        // compression pointer to offset 0x3f in an 18 byte packet
        let packet = query_with_name_bytes(&[0xc0, 0x3f]);
        let source = "127.0.0.1:5353".parse().unwrap();
        assert!(parse_dns(&packet, source).is_err());
    }

    #[test]
    fn test_pointer_loop_rejected() {
        // the name at offset 12 is a pointer to itself
        let packet = query_with_name_bytes(&[0xc0, 0x0c]);
        let source = "127.0.0.1:5353".parse().unwrap();
        assert!(parse_dns(&packet, source).is_err());
    }

    #[test]
    fn test_parse_query() {
        // hand built query for the matter service type
        let mut out = Vec::new();
        out.write_u16::<BigEndian>(7).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u16::<BigEndian>(1).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        out.write_u16::<BigEndian>(0).unwrap();
        encode_label("_matter._tcp.local", &mut out).unwrap();
        out.write_u16::<BigEndian>(TYPE_PTR).unwrap();
        out.write_u16::<BigEndian>(1).unwrap();

        let source = "192.168.1.50:5353".parse().unwrap();
        let msg = parse_dns(&out, source).unwrap();
        assert!(!msg.is_response());
        assert_eq!(msg.queries.len(), 1);
        assert_eq!(msg.queries[0].name, "_matter._tcp.local.");
        assert_eq!(msg.queries[0].typ, TYPE_PTR);
    }
}
