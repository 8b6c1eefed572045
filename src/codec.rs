// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Binary codecs. Storage uses variable length integers, the wire format is
//! fixed width little-endian so that signed payloads have a single encoding.

pub const CODEC_BYTES_LIMIT: usize = 1_000_000;

/// Upper bound for a single network message payload
pub const WIRE_BYTES_LIMIT: usize = 32_000;

pub fn encode_to_vec<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_variable_int_encoding()
        .with_limit::<CODEC_BYTES_LIMIT>();

    bincode::decode_from_slice(bytes, config).map(|r| r.0)
}

pub fn encode_wire<T: bincode::Encode>(val: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
        .with_limit::<WIRE_BYTES_LIMIT>();

    bincode::encode_to_vec(val, config)
}

/// Decodes a wire payload. Trailing bytes are rejected.
pub fn decode_wire<T: bincode::Decode<()>>(
    bytes: &[u8],
) -> Result<T, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
        .with_limit::<WIRE_BYTES_LIMIT>();

    let (val, read) = bincode::decode_from_slice(bytes, config)?;

    if read != bytes.len() {
        return Err(bincode::error::DecodeError::Other("trailing bytes"));
    }

    Ok(val)
}
