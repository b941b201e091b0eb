// relay-protocol: RPC wire envelopes and serialization.
//
// All traffic — single requests, batches, responses, broadcast events —
// is JSON text.  Field presence is significant: an absent key and an
// explicit `null` are different values and both round-trip.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod method_name;

pub use codec::{
    batch_request_from_value, batch_response_from_value, decode_batch_request,
    decode_batch_request_bytes, decode_batch_response, decode_batch_response_bytes,
    decode_request, decode_request_bytes, decode_response, decode_response_bytes,
    encode_batch_request, encode_batch_response, encode_request, encode_response,
    request_from_value, response_from_value,
};
pub use envelope::{BatchRequest, BatchResponse, Meta, Request, Response, RpcError};
pub use error::{error_codes, is_rpc_error, is_valid_error_code, ProtocolError};
