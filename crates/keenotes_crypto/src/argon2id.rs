//! Argon2id (version 0x13) as specified in RFC 9106.
//!
//! Implemented directly so every client derives byte-identical keys without
//! depending on a platform primitive. BLAKE2b itself comes from the `blake2`
//! crate; the variable-length hash `H'`, the block compression `G` and the
//! memory-filling schedule live here.
//!
//! ## Memory layout
//!
//! Memory is `lanes` rows of `lane_length` 1 KiB blocks. Each lane is split
//! into [`SYNC_POINTS`] slices. Pass 0, slices 0 and 1 use data-independent
//! addressing (Argon2i); every other segment uses data-dependent addressing
//! (Argon2d).

use crate::error::{CryptoError, CryptoResult};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use zeroize::Zeroize;

/// Argon2 version implemented here.
pub const ARGON2_VERSION: u32 = 0x13;
/// Argon2 type identifier for Argon2id.
pub const ARGON2ID_TYPE: u32 = 2;
/// Number of synchronization slices per pass.
pub const SYNC_POINTS: u32 = 4;
/// Size of a memory block in 64-bit words.
const QWORDS_IN_BLOCK: usize = 128;
/// Size of a memory block in bytes.
const BLOCK_SIZE: usize = QWORDS_IN_BLOCK * 8;
/// Pseudo-random addresses held by one address block.
const ADDRESSES_IN_BLOCK: u32 = 128;
/// Maximum BLAKE2b output size.
const BLAKE2B_OUTBYTES: usize = 64;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Number of passes over memory.
    pub t_cost: u32,
    /// Memory size in KiB (one block per KiB).
    pub m_cost_kib: u32,
    /// Degree of parallelism.
    pub lanes: u32,
    /// Tag length in bytes.
    pub output_len: usize,
}

impl KdfParams {
    /// Frozen parameter set for envelope version 2.
    pub const V2: KdfParams = KdfParams {
        t_cost: 3,
        m_cost_kib: 65_536,
        lanes: 1,
        output_len: 32,
    };

    /// Checks the parameters against the RFC 9106 bounds.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.lanes == 0 || self.lanes > 0x00FF_FFFF {
            return Err(CryptoError::InvalidParams(format!(
                "lanes must be in 1..=2^24-1, got {}",
                self.lanes
            )));
        }
        if self.t_cost == 0 {
            return Err(CryptoError::InvalidParams("t_cost must be at least 1".into()));
        }
        if u64::from(self.m_cost_kib) < 8 * u64::from(self.lanes) {
            return Err(CryptoError::InvalidParams(format!(
                "m_cost must be at least 8*lanes ({}), got {}",
                8 * u64::from(self.lanes),
                self.m_cost_kib
            )));
        }
        if self.output_len < 4 || self.output_len > u32::MAX as usize {
            return Err(CryptoError::InvalidParams(format!(
                "output length must be at least 4 bytes, got {}",
                self.output_len
            )));
        }
        Ok(())
    }

    fn lane_length(&self) -> u32 {
        // m' = 4 * p * floor(m / 4p), split across p lanes.
        let per_lane_slices = self.m_cost_kib / (SYNC_POINTS * self.lanes);
        per_lane_slices * SYNC_POINTS
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::V2
    }
}

/// A 1 KiB Argon2 memory block.
#[derive(Clone)]
struct Block([u64; QWORDS_IN_BLOCK]);

impl Block {
    const fn zero() -> Self {
        Block([0u64; QWORDS_IN_BLOCK])
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut block = Block::zero();
        for (word, chunk) in block.0.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        block
    }

    fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    fn xor_assign(&mut self, other: &Block) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a ^= b;
        }
    }
}

impl Zeroize for Block {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Computes an Argon2id tag.
///
/// `secret` and `associated_data` are the optional `K` and `X` inputs of
/// RFC 9106; envelope derivation passes both empty.
pub fn argon2id(
    password: &[u8],
    salt: &[u8],
    secret: &[u8],
    associated_data: &[u8],
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    params.validate()?;
    if salt.len() < 8 {
        return Err(CryptoError::InvalidParams(format!(
            "salt must be at least 8 bytes, got {}",
            salt.len()
        )));
    }

    let lanes = params.lanes;
    let lane_length = params.lane_length();
    let segment_length = lane_length / SYNC_POINTS;
    let memory_blocks = lane_length * lanes;

    let mut h0 = initial_hash(password, salt, secret, associated_data, params)?;

    let mut memory = vec![Block::zero(); memory_blocks as usize];

    // First two blocks of every lane come straight from H0.
    let mut seed = [0u8; BLAKE2B_OUTBYTES + 8];
    seed[..BLAKE2B_OUTBYTES].copy_from_slice(&h0);
    for lane in 0..lanes {
        seed[BLAKE2B_OUTBYTES + 4..].copy_from_slice(&lane.to_le_bytes());
        for column in 0..2u32 {
            seed[BLAKE2B_OUTBYTES..BLAKE2B_OUTBYTES + 4].copy_from_slice(&column.to_le_bytes());
            let mut bytes = vec![0u8; BLOCK_SIZE];
            blake2b_long(&mut bytes, &seed)?;
            memory[(lane * lane_length + column) as usize] = Block::from_bytes(&bytes);
            bytes.zeroize();
        }
    }
    seed.zeroize();
    h0.zeroize();

    let geometry = Geometry {
        lanes,
        lane_length,
        segment_length,
        memory_blocks,
        passes: params.t_cost,
    };

    for pass in 0..params.t_cost {
        for slice in 0..SYNC_POINTS {
            // Within one slice a lane only reads finished slices of other
            // lanes, so processing lanes in order matches the parallel schedule.
            for lane in 0..lanes {
                fill_segment(
                    &mut memory,
                    &geometry,
                    Position {
                        pass,
                        lane,
                        slice,
                    },
                );
            }
        }
    }

    let mut final_block = memory[(lane_length - 1) as usize].clone();
    for lane in 1..lanes {
        let last = (lane * lane_length + lane_length - 1) as usize;
        final_block.xor_assign(&memory[last]);
    }

    let mut tag = vec![0u8; params.output_len];
    let mut final_bytes = final_block.to_bytes();
    blake2b_long(&mut tag, &final_bytes)?;

    final_bytes.zeroize();
    final_block.zeroize();
    for block in memory.iter_mut() {
        block.zeroize();
    }

    Ok(tag)
}

struct Geometry {
    lanes: u32,
    lane_length: u32,
    segment_length: u32,
    memory_blocks: u32,
    passes: u32,
}

#[derive(Clone, Copy)]
struct Position {
    pass: u32,
    lane: u32,
    slice: u32,
}

fn initial_hash(
    password: &[u8],
    salt: &[u8],
    secret: &[u8],
    associated_data: &[u8],
    params: &KdfParams,
) -> CryptoResult<[u8; BLAKE2B_OUTBYTES]> {
    let mut hasher = Blake2bVar::new(BLAKE2B_OUTBYTES)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    hasher.update(&params.lanes.to_le_bytes());
    hasher.update(&(params.output_len as u32).to_le_bytes());
    hasher.update(&params.m_cost_kib.to_le_bytes());
    hasher.update(&params.t_cost.to_le_bytes());
    hasher.update(&ARGON2_VERSION.to_le_bytes());
    hasher.update(&ARGON2ID_TYPE.to_le_bytes());
    for input in [password, salt, secret, associated_data] {
        hasher.update(&(input.len() as u32).to_le_bytes());
        hasher.update(input);
    }

    let mut out = [0u8; BLAKE2B_OUTBYTES];
    hasher
        .finalize_variable(&mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

/// Variable-length hash `H'` built on BLAKE2b.
fn blake2b_long(out: &mut [u8], input: &[u8]) -> CryptoResult<()> {
    let out_len = out.len();
    let len_prefix = (out_len as u32).to_le_bytes();

    if out_len <= BLAKE2B_OUTBYTES {
        let mut hasher =
            Blake2bVar::new(out_len).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        hasher.update(&len_prefix);
        hasher.update(input);
        return hasher
            .finalize_variable(out)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()));
    }

    let mut hasher = Blake2bVar::new(BLAKE2B_OUTBYTES)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hasher.update(&len_prefix);
    hasher.update(input);
    let mut v = [0u8; BLAKE2B_OUTBYTES];
    hasher
        .finalize_variable(&mut v)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    // Emit the first half of each intermediate digest, then the tail in full.
    let half = BLAKE2B_OUTBYTES / 2;
    let mut written = 0;
    out[..half].copy_from_slice(&v[..half]);
    written += half;

    while out_len - written > BLAKE2B_OUTBYTES {
        let mut hasher = Blake2bVar::new(BLAKE2B_OUTBYTES)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        hasher.update(&v);
        hasher
            .finalize_variable(&mut v)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        out[written..written + half].copy_from_slice(&v[..half]);
        written += half;
    }

    let remaining = out_len - written;
    let mut hasher =
        Blake2bVar::new(remaining).map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hasher.update(&v);
    hasher
        .finalize_variable(&mut out[written..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    v.zeroize();
    Ok(())
}

fn fill_segment(memory: &mut [Block], geometry: &Geometry, position: Position) {
    let Position { pass, lane, slice } = position;
    let data_independent = pass == 0 && slice < SYNC_POINTS / 2;

    let mut address_block = Block::zero();
    let mut input_block = Block::zero();
    let zero_block = Block::zero();

    if data_independent {
        input_block.0[0] = u64::from(pass);
        input_block.0[1] = u64::from(lane);
        input_block.0[2] = u64::from(slice);
        input_block.0[3] = u64::from(geometry.memory_blocks);
        input_block.0[4] = u64::from(geometry.passes);
        input_block.0[5] = u64::from(ARGON2ID_TYPE);
    }

    let mut starting_index = 0u32;
    if pass == 0 && slice == 0 {
        starting_index = 2;
        if data_independent {
            next_addresses(&mut address_block, &mut input_block, &zero_block);
        }
    }

    let mut curr_offset =
        lane * geometry.lane_length + slice * geometry.segment_length + starting_index;
    let mut prev_offset = if curr_offset % geometry.lane_length == 0 {
        curr_offset + geometry.lane_length - 1
    } else {
        curr_offset - 1
    };

    for index in starting_index..geometry.segment_length {
        if curr_offset % geometry.lane_length == 1 {
            prev_offset = curr_offset - 1;
        }

        let pseudo_rand = if data_independent {
            if index % ADDRESSES_IN_BLOCK == 0 {
                next_addresses(&mut address_block, &mut input_block, &zero_block);
            }
            address_block.0[(index % ADDRESSES_IN_BLOCK) as usize]
        } else {
            memory[prev_offset as usize].0[0]
        };

        let mut ref_lane = ((pseudo_rand >> 32) % u64::from(geometry.lanes)) as u32;
        if pass == 0 && slice == 0 {
            ref_lane = lane;
        }

        let ref_index = index_alpha(
            geometry,
            position,
            index,
            pseudo_rand & 0xFFFF_FFFF,
            ref_lane == lane,
        );
        let ref_offset = (geometry.lane_length * ref_lane + ref_index) as usize;

        let next = compress(&memory[prev_offset as usize], &memory[ref_offset]);
        let current = &mut memory[curr_offset as usize];
        if pass == 0 {
            *current = next;
        } else {
            current.xor_assign(&next);
        }

        curr_offset += 1;
        prev_offset += 1;
    }
}

fn next_addresses(address_block: &mut Block, input_block: &mut Block, zero_block: &Block) {
    input_block.0[6] += 1;
    let first = compress(zero_block, input_block);
    *address_block = compress(zero_block, &first);
}

/// Maps a 32-bit pseudo-random value onto the allowed reference window.
fn index_alpha(
    geometry: &Geometry,
    position: Position,
    index: u32,
    pseudo_rand: u64,
    same_lane: bool,
) -> u32 {
    let segment_length = u64::from(geometry.segment_length);
    let lane_length = u64::from(geometry.lane_length);
    let index = u64::from(index);
    let slice = u64::from(position.slice);

    let reference_area_size: u64 = if position.pass == 0 {
        if position.slice == 0 {
            index - 1
        } else if same_lane {
            slice * segment_length + index - 1
        } else if index == 0 {
            slice * segment_length - 1
        } else {
            slice * segment_length
        }
    } else if same_lane {
        lane_length - segment_length + index - 1
    } else if index == 0 {
        lane_length - segment_length - 1
    } else {
        lane_length - segment_length
    };

    let mut relative_position = pseudo_rand;
    relative_position = (relative_position * relative_position) >> 32;
    relative_position = reference_area_size - 1 - ((reference_area_size * relative_position) >> 32);

    let start_position = if position.pass != 0 && position.slice != SYNC_POINTS - 1 {
        (slice + 1) * segment_length
    } else {
        0
    };

    ((start_position + relative_position) % lane_length) as u32
}

/// Block compression `G(X, Y)`.
fn compress(x: &Block, y: &Block) -> Block {
    let mut r = x.clone();
    r.xor_assign(y);
    let mut q = r.clone();

    for row in 0..8 {
        let base = 16 * row;
        permute(
            &mut q.0,
            [
                base,
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7,
                base + 8,
                base + 9,
                base + 10,
                base + 11,
                base + 12,
                base + 13,
                base + 14,
                base + 15,
            ],
        );
    }

    for column in 0..8 {
        let base = 2 * column;
        permute(
            &mut q.0,
            [
                base,
                base + 1,
                base + 16,
                base + 17,
                base + 32,
                base + 33,
                base + 48,
                base + 49,
                base + 64,
                base + 65,
                base + 80,
                base + 81,
                base + 96,
                base + 97,
                base + 112,
                base + 113,
            ],
        );
    }

    q.xor_assign(&r);
    q
}

/// The BLAKE2b round function without message words, over 16 words of `v`.
#[inline(always)]
fn permute(v: &mut [u64; QWORDS_IN_BLOCK], i: [usize; 16]) {
    gb(v, i[0], i[4], i[8], i[12]);
    gb(v, i[1], i[5], i[9], i[13]);
    gb(v, i[2], i[6], i[10], i[14]);
    gb(v, i[3], i[7], i[11], i[15]);

    gb(v, i[0], i[5], i[10], i[15]);
    gb(v, i[1], i[6], i[11], i[12]);
    gb(v, i[2], i[7], i[8], i[13]);
    gb(v, i[3], i[4], i[9], i[14]);
}

#[inline(always)]
fn fblamka(x: u64, y: u64) -> u64 {
    let xy = (x & 0xFFFF_FFFF).wrapping_mul(y & 0xFFFF_FFFF);
    x.wrapping_add(y).wrapping_add(xy.wrapping_mul(2))
}

#[inline(always)]
fn gb(v: &mut [u64; QWORDS_IN_BLOCK], a: usize, b: usize, c: usize, d: usize) {
    v[a] = fblamka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = fblamka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = fblamka(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = fblamka(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}
