use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};

use crate::browser::BrowserProfile;
use crate::error::EncodingError;
use crate::transport::HttpMethod;

/// Advertised EDNS UDP payload size
pub const EDNS_PAYLOAD: u16 = 4096;
/// Padding block for queries carried in a POST body
pub const POST_PADDING_BLOCK: usize = 128;
/// Padding block for queries carried in a GET `dns` parameter
pub const GET_PADDING_BLOCK: usize = 113;

const OPT_RECORD_TYPE: u16 = 41;
const OPTION_CLIENT_SUBNET: u16 = 8;
const OPTION_PADDING: u16 = 12;
// root owner name (1) + type (2) + class (2) + ttl (4) + rdlength (2)
const OPT_FIXED_LEN: usize = 11;
const OPTION_HEADER_LEN: usize = 4;

/// EDNS layout of a query, fixed by the browser profile and HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryShape {
	/// Whole message is padded to a multiple of this many bytes
	pub padding_block: usize,
	/// Attach a zeroed client-subnet option (0.0.0.0/0)
	pub client_subnet: bool,
}

impl QueryShape {
	pub fn for_request(profile: BrowserProfile, method: HttpMethod) -> Self {
		match method {
			HttpMethod::Post => QueryShape {
				padding_block: POST_PADDING_BLOCK,
				client_subnet: profile == BrowserProfile::Firefox,
			},
			HttpMethod::Get => QueryShape {
				padding_block: GET_PADDING_BLOCK,
				client_subnet: false,
			},
		}
	}
}

/// Build the wire-format A/IN query for `domain`.
///
/// The transaction id is always 0 and padding bytes are zero, so identical
/// inputs always serialize to identical bytes. The OPT record is appended by
/// hand so that option order (client-subnet, then padding) is fixed.
pub fn build_query(domain: &str, shape: &QueryShape) -> Result<Vec<u8>, EncodingError> {
	let name = Name::from_ascii(domain).map_err(|e| EncodingError::Domain {
		domain: domain.to_string(),
		reason: e.to_string(),
	})?;

	let mut message = Message::new();
	message.set_id(0);
	message.set_recursion_desired(true);
	message.add_query(Query::query(name, RecordType::A));

	let mut wire = message.to_vec()
		.map_err(|e| EncodingError::Serialize(e.to_string()))?;

	let mut options = Vec::new();
	if shape.client_subnet {
		// family 1 (IPv4), source prefix 0, scope prefix 0, no address bytes
		push_option(&mut options, OPTION_CLIENT_SUBNET, &[0, 1, 0, 0]);
	}

	let unpadded = wire.len() + OPT_FIXED_LEN + options.len() + OPTION_HEADER_LEN;
	let pad_len = padding_len(unpadded, shape.padding_block);
	push_option(&mut options, OPTION_PADDING, &vec![0u8; pad_len]);

	let rdlength = u16::try_from(options.len())
		.map_err(|_| EncodingError::Serialize("EDNS options too large".to_string()))?;

	wire.push(0); // root owner name
	wire.extend_from_slice(&OPT_RECORD_TYPE.to_be_bytes());
	wire.extend_from_slice(&EDNS_PAYLOAD.to_be_bytes());
	// extended rcode 0, version 0, no flags
	wire.extend_from_slice(&[0, 0, 0, 0]);
	wire.extend_from_slice(&rdlength.to_be_bytes());
	wire.extend_from_slice(&options);

	let arcount = u16::from_be_bytes([wire[10], wire[11]]) + 1;
	wire[10..12].copy_from_slice(&arcount.to_be_bytes());

	Ok(wire)
}

/// Number of padding bytes needed to round `len` up to a multiple of `block`.
pub fn padding_len(len: usize, block: usize) -> usize {
	if block == 0 {
		return 0;
	}
	(block - len % block) % block
}

fn push_option(buf: &mut Vec<u8>, code: u16, data: &[u8]) {
	buf.extend_from_slice(&code.to_be_bytes());
	buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
	buf.extend_from_slice(data);
}
