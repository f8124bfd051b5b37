//! Multicall3 aggregator interface and per-network deployment table.

use crate::error::BatchError;
use alloy::{
    eips::BlockId,
    primitives::{Address, Bytes, ChainId, TxKind, U256, address},
    rpc::{
        json_rpc::{Id, Request, RequestPacket, ResponsePacket, ResponsePayload},
        types::{TransactionInput, TransactionRequest},
    },
    sol,
    sol_types::SolCall,
    transports::TransportError,
};

sol! {
    /// A single call in an `aggregate3` batch.
    #[derive(Debug)]
    struct Call3 {
        /// Target contract address.
        address target;
        /// Whether the batch tolerates this call reverting.
        bool allowFailure;
        /// Encoded function call data.
        bytes callData;
    }

    /// Outcome of a single call within an `aggregate3` batch.
    #[derive(Debug)]
    struct CallResult {
        bool success;
        bytes returnData;
    }

    /// Executes a batch of read calls in one query.
    function aggregate3(Call3[] calldata calls) external payable returns (CallResult[] memory returnData);

    /// Returns the native balance of `addr`.
    function getEthBalance(address addr) external view returns (uint256 balance);
}

/// Canonical Multicall3 deployment, shared across most networks.
const MULTICALL3: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

/// Returns the aggregator contract address for the given chain, if one is deployed.
///
/// Networks absent from this table have no batching capability; the layer forwards
/// every request directly on those chains.
pub const fn aggregator_address(chain_id: ChainId) -> Option<Address> {
    match chain_id {
        // Ethereum mainnet, Flare, Sepolia.
        1 | 14 | 11155111 => Some(MULTICALL3),
        _ => None,
    }
}

/// Builds an `eth_call` packet against the aggregator contract.
fn eth_call_request(
    aggregator: Address,
    data: Bytes,
    block: BlockId,
) -> Result<RequestPacket, TransportError> {
    let tx = TransactionRequest {
        to: Some(TxKind::Call(aggregator)),
        input: TransactionInput::new(data),
        ..Default::default()
    };
    let request = Request::new(crate::ETH_CALL, Id::Number(0), (tx, block));
    Ok(request.serialize().map_err(TransportError::SerError)?.into())
}

/// Builds the aggregate `eth_call` for a batch.
///
/// Returns the packet together with the calls; ownership is reclaimed after encoding
/// so per-call failures can reference the original call descriptors.
pub(crate) fn aggregate_request(
    aggregator: Address,
    calls: Vec<Call3>,
    block: BlockId,
) -> Result<(RequestPacket, Vec<Call3>), TransportError> {
    let call = aggregate3Call { calls };
    let packet = eth_call_request(aggregator, call.abi_encode().into(), block)?;
    Ok((packet, call.calls))
}

/// Builds the direct aggregator call for a native balance read.
pub(crate) fn balance_request(
    aggregator: Address,
    addr: Address,
    block: BlockId,
) -> Result<RequestPacket, TransportError> {
    eth_call_request(aggregator, getEthBalanceCall { addr }.abi_encode().into(), block)
}

/// Extracts the raw return bytes from a single `eth_call` response.
pub(crate) fn call_return_data(resp: ResponsePacket) -> Result<Bytes, BatchError> {
    let ResponsePacket::Single(resp) = resp else {
        return Err(BatchError::Decode("batch response to a single request".to_string()));
    };
    match resp.payload {
        ResponsePayload::Success(raw) => {
            serde_json::from_str(raw.get()).map_err(|err| BatchError::Decode(err.to_string()))
        }
        ResponsePayload::Failure(err) => {
            Err(BatchError::aggregate(TransportError::ErrorResp(err)))
        }
    }
}

/// Decodes an `aggregate3` response into per-call results.
///
/// The result array must line up one-to-one with the dispatched calls; anything else
/// is an aggregator problem and fails the whole batch.
pub(crate) fn decode_aggregate(
    resp: ResponsePacket,
    expected: usize,
) -> Result<Vec<CallResult>, BatchError> {
    let data = call_return_data(resp)?;
    let results =
        aggregate3Call::abi_decode_returns(&data).map_err(|err| BatchError::Decode(err.to_string()))?;
    if results.len() != expected {
        return Err(BatchError::Decode(format!(
            "expected {expected} results, got {}",
            results.len()
        )));
    }
    Ok(results)
}

/// Decodes a `getEthBalance` response into the account balance.
pub(crate) fn decode_balance(resp: ResponsePacket) -> Result<U256, BatchError> {
    let data = call_return_data(resp)?;
    getEthBalanceCall::abi_decode_returns(&data).map_err(|err| BatchError::Decode(err.to_string()))
}
