//! DNS message encoding and response interpretation.

use crate::base::neterror::NetError;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_resolver::proto::rr::{Name, RData, RecordType};
use hickory_resolver::proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::IpAddr;

/// Encodes a recursive query for `domain` with the given id.
pub fn encode_query(domain: &str, qtype: RecordType, id: u16) -> Result<Vec<u8>, NetError> {
    let mut name = Name::from_ascii(domain).map_err(|_| NetError::InvalidUrl)?;
    name.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, qtype));
    message.to_bytes().map_err(NetError::unknown)
}

/// Decodes raw bytes into a message, requiring a response.
pub fn decode_response(raw: &[u8]) -> Result<Message, NetError> {
    let message = Message::from_bytes(raw).map_err(|_| NetError::DnsServerMisbehaving)?;
    if message.message_type() != MessageType::Response {
        return Err(NetError::DnsServerMisbehaving);
    }
    Ok(message)
}

/// Maps a non-success response code to a failure.
pub fn rcode_error(rcode: ResponseCode) -> Option<NetError> {
    match rcode {
        ResponseCode::NoError => None,
        ResponseCode::NXDomain => Some(NetError::DnsNxdomain),
        ResponseCode::Refused => Some(NetError::DnsRefused),
        _ => Some(NetError::DnsServerMisbehaving),
    }
}

/// Extracts the addresses of type `qtype` from a response.
///
/// An empty answer section is reported as `dns_no_answer`.
pub fn answers(message: &Message, qtype: RecordType) -> Result<Vec<(IpAddr, Option<u32>)>, NetError> {
    if let Some(err) = rcode_error(message.response_code()) {
        return Err(err);
    }
    let ips: Vec<(IpAddr, Option<u32>)> = message
        .answers()
        .iter()
        .filter_map(|record| {
            let ip = match (record.data(), qtype) {
                (RData::A(a), RecordType::A) => IpAddr::V4(a.0),
                (RData::AAAA(aaaa), RecordType::AAAA) => IpAddr::V6(aaaa.0),
                _ => return None,
            };
            Some((ip, Some(record.ttl())))
        })
        .collect();
    if ips.is_empty() {
        return Err(NetError::DnsNoAnswer);
    }
    Ok(ips)
}

/// Decodes `raw`, checks its id, and extracts the answers.
pub fn parse_response(
    raw: &[u8],
    expected_id: u16,
    qtype: RecordType,
) -> Result<Vec<(IpAddr, Option<u32>)>, NetError> {
    let message = decode_response(raw)?;
    if message.id() != expected_id {
        return Err(NetError::DnsServerMisbehaving);
    }
    answers(&message, qtype)
}
