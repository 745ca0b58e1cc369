//! Systematic Reed-Solomon erasure coding for premium-tier deals
//! (§4.7): the CID's bytes are split into `K` fixed-size data chunks,
//! `P` parity chunks are computed such that any `K` of the `K+P`
//! chunks reconstruct the original, and each chunk is re-uploaded to
//! IPFS with its index and role recorded in `deal.erasureMetadata`.

use reed_solomon_erasure::galois_8::ReedSolomon;
use relay_types::RelayError;
use serde::{Deserialize, Serialize};

use crate::IpfsClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkRole {
    Data,
    Parity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    pub index: usize,
    pub cid: String,
    pub role: ChunkRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureMetadata {
    pub chunks: Vec<ChunkRef>,
    pub original_size: u64,
    pub chunk_size: usize,
    pub data_shards: usize,
    pub parity_shards: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ErasureConfig {
    pub chunk_size: usize,
    pub data_shards: usize,
    pub parity_shards: usize,
}

impl Default for ErasureConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            data_shards: 10,
            parity_shards: 4,
        }
    }
}

fn split_into_shards(data: &[u8], config: &ErasureConfig) -> Vec<Vec<u8>> {
    let mut shards: Vec<Vec<u8>> = data
        .chunks(config.chunk_size)
        .map(|c| {
            let mut shard = c.to_vec();
            shard.resize(config.chunk_size, 0);
            shard
        })
        .collect();
    while shards.len() < config.data_shards {
        shards.push(vec![0u8; config.chunk_size]);
    }
    shards
}

/// Encodes `data`'s data shards plus the computed parity shards.
/// Returns `data_shards + parity_shards` equal-sized byte vectors in
/// index order (data shards first, then parity).
pub fn encode(data: &[u8], config: &ErasureConfig) -> Result<Vec<Vec<u8>>, RelayError> {
    let rs = ReedSolomon::new(config.data_shards, config.parity_shards)
        .map_err(|e| RelayError::InvalidInput(format!("invalid erasure config: {e}")))?;
    let mut shards = split_into_shards(data, config);
    shards.extend((0..config.parity_shards).map(|_| vec![0u8; config.chunk_size]));
    rs.encode(&mut shards)
        .map_err(|e| RelayError::Upstream(format!("erasure encode failed: {e}")))?;
    Ok(shards)
}

/// Reconstructs the original bytes from a set of present shards (data
/// or parity, `None` for missing ones), requiring at least `K` present
/// by the code's design. Trims the result to `original_size`.
pub fn reconstruct(
    mut shards: Vec<Option<Vec<u8>>>,
    config: &ErasureConfig,
    original_size: u64,
) -> Result<Vec<u8>, RelayError> {
    let present = shards.iter().filter(|s| s.is_some()).count();
    if present < config.data_shards {
        return Err(RelayError::InvalidInput(format!(
            "erasure reconstruction needs at least {} chunks, got {present}",
            config.data_shards
        )));
    }
    let rs = ReedSolomon::new(config.data_shards, config.parity_shards)
        .map_err(|e| RelayError::InvalidInput(format!("invalid erasure config: {e}")))?;
    rs.reconstruct(&mut shards)
        .map_err(|e| RelayError::Upstream(format!("erasure reconstruction failed: {e}")))?;
    let mut out = Vec::with_capacity(config.data_shards * config.chunk_size);
    for shard in shards.into_iter().take(config.data_shards) {
        out.extend(shard.expect("reconstruct fills every shard on success"));
    }
    out.truncate(original_size as usize);
    Ok(out)
}

/// Cats `cid` from IPFS, erasure-codes it, uploads each chunk back to
/// IPFS, and returns the metadata recorded on the deal.
pub async fn encode_and_upload(
    ipfs: &dyn IpfsClient,
    cid: &str,
    config: &ErasureConfig,
) -> Result<ErasureMetadata, RelayError> {
    let data = ipfs.cat(cid).await?;
    let original_size = data.len() as u64;
    let shards = encode(&data, config)?;

    let mut chunks = Vec::with_capacity(shards.len());
    for (index, shard) in shards.into_iter().enumerate() {
        let role = if index < config.data_shards {
            ChunkRole::Data
        } else {
            ChunkRole::Parity
        };
        let chunk_cid = ipfs.add(shard).await?;
        chunks.push(ChunkRef {
            index,
            cid: chunk_cid,
            role,
        });
    }

    Ok(ErasureMetadata {
        chunks,
        original_size,
        chunk_size: config.chunk_size,
        data_shards: config.data_shards,
        parity_shards: config.parity_shards,
    })
}

/// Fetches at least `K` chunks from IPFS (preferring data chunks) and
/// reconstructs the original content.
pub async fn fetch_and_reconstruct(
    ipfs: &dyn IpfsClient,
    metadata: &ErasureMetadata,
) -> Result<Vec<u8>, RelayError> {
    let total = metadata.data_shards + metadata.parity_shards;
    let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
    let mut fetched = 0usize;
    let mut ordered = metadata.chunks.clone();
    ordered.sort_by_key(|c| matches!(c.role, ChunkRole::Parity));
    for chunk in &ordered {
        if fetched >= metadata.data_shards {
            break;
        }
        match ipfs.cat(&chunk.cid).await {
            Ok(bytes) => {
                shards[chunk.index] = Some(bytes);
                fetched += 1;
            }
            Err(e) => {
                tracing::warn!(cid = %chunk.cid, error = %e, "erasure chunk fetch failed, trying next");
            }
        }
    }
    let config = ErasureConfig {
        chunk_size: metadata.chunk_size,
        data_shards: metadata.data_shards,
        parity_shards: metadata.parity_shards,
    };
    reconstruct(shards, &config, metadata.original_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_reconstruct_from_only_k_data_shards() {
        let config = ErasureConfig {
            chunk_size: 16,
            data_shards: 4,
            parity_shards: 2,
        };
        let data = b"this is exactly sixty-four bytes of payload data!!!!!!!!!!!!!!".to_vec();
        assert_eq!(data.len(), 64);
        let shards = encode(&data, &config).unwrap();
        assert_eq!(shards.len(), 6);

        let mut present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        present[0] = None;
        present[1] = None;
        let recovered = reconstruct(present, &config, data.len() as u64).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn reconstruction_from_parity_only_also_recovers_k_data() {
        let config = ErasureConfig {
            chunk_size: 16,
            data_shards: 4,
            parity_shards: 4,
        };
        let data = b"0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd".to_vec();
        let shards = encode(&data, &config).unwrap();
        // keep 2 data shards and 2 parity shards (still >= K=4 total present)
        let mut present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        present[2] = None;
        present[3] = None;
        let recovered = reconstruct(present, &config, data.len() as u64).unwrap();
        assert_eq!(recovered, data);
    }

    #[test]
    fn fewer_than_k_shards_refuses_to_reconstruct() {
        let config = ErasureConfig {
            chunk_size: 16,
            data_shards: 4,
            parity_shards: 2,
        };
        let shards = vec![Some(vec![0u8; 16]), Some(vec![0u8; 16]), None, None, None, None];
        assert!(reconstruct(shards, &config, 64).is_err());
    }
}
