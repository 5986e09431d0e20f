//! Peer-side handling of block fetch requests.

use crate::fetch::protocol::{
    FetchError, FetchRequest, FetchResponse, PageToken, ProtocolVersion, RawSeries,
};
use crate::sink::BlockStore;

/// Answers a fetch request from the blocks held in `store`.
///
/// V1 requests receive the whole block. V2 requests receive at most
/// `page_size` series, with a token naming the index of the next series.
/// A missing block is a definitive empty reply.
pub fn serve_fetch<S: BlockStore + ?Sized>(
    store: &S,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let block = store
        .read_block(&request.namespace, request.shard, request.block_start)
        .map_err(|err| FetchError::Rejected(err.to_string()))?;
    let Some(block) = block else {
        return Ok(FetchResponse::empty());
    };
    if block.block.size != request.block_size {
        return Err(FetchError::Rejected(format!(
            "block size mismatch: stored {:?}, requested {:?}",
            block.block.size, request.block_size
        )));
    }

    let total = block.series.len();
    let series = block
        .series
        .into_values()
        .map(|series| RawSeries::new(series.id().clone(), series.into_points()));
    match request.version {
        ProtocolVersion::V1 => Ok(FetchResponse::with_series(series.collect())),
        ProtocolVersion::V2 => {
            let offset = match &request.page_token {
                Some(token) => decode_offset(token)?,
                None => 0,
            };
            let page_size = request.page_size.max(1);
            let page: Vec<RawSeries> = series.skip(offset).take(page_size).collect();
            let next = offset + page.len();
            Ok(FetchResponse {
                series: page,
                next_page: (next < total).then(|| encode_offset(next)),
            })
        }
    }
}

fn encode_offset(offset: usize) -> PageToken {
    PageToken((offset as u64).to_le_bytes().to_vec())
}

fn decode_offset(token: &PageToken) -> Result<usize, FetchError> {
    let bytes: [u8; 8] = token
        .0
        .as_slice()
        .try_into()
        .map_err(|_| FetchError::Rejected("malformed page token".into()))?;
    Ok(u64::from_le_bytes(bytes) as usize)
}
