use bitstream_io::{BigEndian, BitWriter};
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::header::Header;
use super::name;
use super::types::{QType, RCode};
use super::ParseError;

const QCLASS_IN: u16 = 1;

/// A parsed inbound question. Carries the original wire encoding of the
/// question section so replies can echo it byte-for-byte rather than
/// re-serializing it.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    pub name: String,
    pub qtype: QType,
    question_wire: Vec<u8>,
}

impl Query {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One upstream answer line, already translated into this resolver's shape.
/// `data` is interpreted per `qtype` when building the wire RDATA.
#[derive(Debug, Clone)]
pub struct Answer {
    pub name: String,
    pub qtype: QType,
    pub ttl: u32,
    pub data: String,
}

pub fn parse(bytes: &[u8]) -> Result<Query, ParseError> {
    if bytes.len() < 12 {
        return Err(ParseError::Malformed("packet shorter than a header".into()));
    }

    let mut reader = bitstream_io::BitReader::endian(Cursor::new(bytes), BigEndian);
    let header = Header::read(&mut reader)?;

    if header.qdcount == 0 {
        return Err(ParseError::EmptyQuestion);
    }

    let (name, name_end) = name::decode(bytes, 12)?;

    let qtype_bytes: [u8; 2] = bytes
        .get(name_end..name_end + 2)
        .ok_or_else(|| ParseError::Malformed("truncated qtype".into()))?
        .try_into()
        .unwrap();
    let qclass_bytes: [u8; 2] = bytes
        .get(name_end + 2..name_end + 4)
        .ok_or_else(|| ParseError::Malformed("truncated qclass".into()))?
        .try_into()
        .unwrap();

    let qtype = u16::from_be_bytes(qtype_bytes);
    let qclass = u16::from_be_bytes(qclass_bytes);
    if qclass != QCLASS_IN {
        return Err(ParseError::Malformed(format!("unsupported class {qclass}")));
    }

    let question_end = name_end + 4;
    let question_wire = bytes[12..question_end].to_vec();

    Ok(Query {
        id: header.id,
        name: name.trim_end_matches('.').to_lowercase(),
        qtype: QType::from(qtype),
        question_wire,
    })
}

pub fn build_reply(query: &Query, answers: &[Answer], rcode: RCode) -> Vec<u8> {
    let header = Header {
        id: query.id,
        qr: true,
        opcode: 0,
        aa: false,
        tc: false,
        rd: true,
        ra: true,
        z: 0,
        rcode: rcode.into(),
        qdcount: 1,
        ancount: answers.len() as u16,
        nscount: 0,
        arcount: 0,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = BitWriter::endian(&mut bytes, BigEndian);
        header.write(&mut writer).expect("writing to Vec never fails");
    }
    bytes.extend_from_slice(&query.question_wire);
    for answer in answers {
        encode_answer(answer, &mut bytes);
    }
    bytes
}

pub fn build_error_reply(query: &Query, rcode: RCode) -> Vec<u8> {
    build_reply(query, &[], rcode)
}

/// Build an error reply for a query whose id parsed but whose question
/// section didn't (e.g. a name over the wire length limits) — there's no
/// question to echo back, so the reply carries an empty question section.
pub fn build_minimal_error_reply(id: u16, rcode: RCode) -> Vec<u8> {
    let header = Header {
        id,
        qr: true,
        opcode: 0,
        aa: false,
        tc: false,
        rd: true,
        ra: true,
        z: 0,
        rcode: rcode.into(),
        qdcount: 0,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = BitWriter::endian(&mut bytes, BigEndian);
        header.write(&mut writer).expect("writing to Vec never fails");
    }
    bytes
}

/// Pull the transaction id out of a packet too malformed to fully parse.
/// The id lives in the first two octets regardless of what follows.
pub fn peek_id(bytes: &[u8]) -> Option<u16> {
    bytes.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn encode_answer(answer: &Answer, out: &mut Vec<u8>) {
    out.extend(name::encode(&answer.name));
    out.extend_from_slice(&u16::from(answer.qtype).to_be_bytes());
    out.extend_from_slice(&QCLASS_IN.to_be_bytes());
    out.extend_from_slice(&answer.ttl.to_be_bytes());

    let rdata = build_rdata(answer.qtype, &answer.data);
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend(rdata);
}

/// Build the type-specific RDATA from an answer's textual `data` field.
/// Unparseable data for a given type falls back to an empty RDATA rather
/// than failing the whole reply — the caller is expected to have already
/// dropped answers it didn't trust.
fn build_rdata(qtype: QType, data: &str) -> Vec<u8> {
    match qtype {
        QType::A => data
            .parse::<Ipv4Addr>()
            .map(|ip| ip.octets().to_vec())
            .unwrap_or_default(),
        QType::AAAA => data
            .parse::<Ipv6Addr>()
            .map(|ip| ip.octets().to_vec())
            .unwrap_or_default(),
        QType::CNAME | QType::NS | QType::PTR => name::encode(data),
        QType::MX => {
            let mut parts = data.splitn(2, ' ');
            let preference: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let exchange = parts.next().unwrap_or(".");
            let mut bytes = preference.to_be_bytes().to_vec();
            bytes.extend(name::encode(exchange));
            bytes
        }
        QType::TXT => {
            let mut bytes = Vec::new();
            for chunk in data.as_bytes().chunks(255) {
                bytes.push(chunk.len() as u8);
                bytes.extend_from_slice(chunk);
            }
            bytes
        }
        QType::SOA | QType::Other(_) => Vec::new(),
    }
}

/// Whether an answer's data is well-formed enough for its declared type.
/// Used by the resolver to silently skip malformed upstream answer lines
/// while still serving the ones that parsed.
pub fn answer_is_valid(answer: &Answer) -> bool {
    match answer.qtype {
        QType::A => answer.data.parse::<Ipv4Addr>().is_ok(),
        QType::AAAA => answer.data.parse::<Ipv6Addr>().is_ok(),
        QType::CNAME | QType::NS | QType::PTR => !answer.data.is_empty(),
        QType::MX => {
            let mut parts = answer.data.splitn(2, ' ');
            let pref_ok = parts.next().map(|p| p.parse::<u16>().is_ok()).unwrap_or(false);
            let exchange_ok = parts.next().map(|e| !e.is_empty()).unwrap_or(false);
            pref_ok && exchange_ok
        }
        QType::TXT => true,
        QType::SOA | QType::Other(_) => false,
    }
}
