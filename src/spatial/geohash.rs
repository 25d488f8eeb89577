//! Short location hashes usable for prefix search.
//!
//! With base 32 this produces Geohash strings (each level splits cells into
//! 32); with base 4 it produces a quadtree (each level splits cells into 4
//! quadrants). Bits interleave longitude first, like Geohash.

use super::LatLong;
use crate::error::ProfileError;

const GEOHASH_CHARS: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

fn char_value(c: char) -> Option<u32> {
    GEOHASH_CHARS
        .iter()
        .position(|&g| g as char == c)
        .map(|p| p as u32)
}

fn base_bits(base: u32) -> Result<u32, ProfileError> {
    if !base.is_power_of_two() || base < 2 || base > 32 {
        return Err(ProfileError::Config(format!(
            "hash base must be a power of 2 in 2..=32, got {base}"
        )));
    }
    Ok(base.trailing_zeros())
}

/// Hash coordinates into a short string of `precision` characters.
pub fn hash_location(point: LatLong, base: u32, precision: usize) -> Result<String, ProfileError> {
    let [latitude, longitude] = point;
    let bits_per_char = base_bits(base)?;
    let precision_bits = bits_per_char as usize * precision;

    let mut lat_range = (-90.0f64, 90.0f64);
    let mut long_range = (-180.0f64, 180.0f64);
    let mut bits: Vec<u8> = Vec::with_capacity(precision_bits + 1);
    while bits.len() < precision_bits {
        let mid = (long_range.0 + long_range.1) / 2.0;
        if longitude > mid {
            bits.push(1);
            long_range.0 = mid;
        } else {
            bits.push(0);
            long_range.1 = mid;
        }

        let mid = (lat_range.0 + lat_range.1) / 2.0;
        if latitude > mid {
            bits.push(1);
            lat_range.0 = mid;
        } else {
            bits.push(0);
            lat_range.1 = mid;
        }
    }

    let mut hash = String::with_capacity(precision);
    for chunk in bits.chunks_exact(bits_per_char as usize) {
        let mut value = 0usize;
        for &bit in chunk {
            value = (value << 1) | bit as usize;
        }
        hash.push(GEOHASH_CHARS[value] as char);
    }
    Ok(hash)
}

/// Turn a hash back into a rectangle, `(min_lat, max_lat, min_long, max_long)`.
pub fn decode_hash(hash: &str, base: u32) -> Result<(f64, f64, f64, f64), ProfileError> {
    let bits_per_char = base_bits(base)?;

    let mut lat_range = (-90.0f64, 90.0f64);
    let mut long_range = (-180.0f64, 180.0f64);
    let mut next_long = true;
    for c in hash.chars() {
        let value = char_value(c).ok_or_else(|| {
            ProfileError::Config(format!("invalid hash character {c:?}"))
        })?;
        for i in (0..bits_per_char).rev() {
            let bit = (value >> i) & 1;
            if next_long {
                let mid = (long_range.0 + long_range.1) / 2.0;
                if bit == 1 {
                    long_range.0 = mid;
                } else {
                    long_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            next_long = !next_long;
        }
    }

    Ok((lat_range.0, lat_range.1, long_range.0, long_range.1))
}
