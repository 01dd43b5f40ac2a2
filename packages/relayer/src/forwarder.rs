//! Forward request model and the forwarder's EIP-712 signing scheme.
//!
//! The signing payload is the EIP-712 hash of
//! `ForwardRequest(address from,address to,uint256 value,uint256 gas,uint256 nonce,bytes data)`
//! under the domain `{name, version, chainId, verifyingContract = forwarder}`.
//! Clients must produce exactly this hash or every signature fails recovery.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{eip712_domain, Eip712Domain, SolCall, SolStruct};
use serde::{Deserialize, Serialize};

pub mod abi {
    use alloy::sol;

    sol! {
        #[allow(missing_docs)]
        #[derive(Debug, PartialEq, Eq)]
        struct ForwardRequest {
            address from;
            address to;
            uint256 value;
            uint256 gas;
            uint256 nonce;
            bytes data;
        }

        #[allow(missing_docs)]
        #[derive(Debug)]
        #[sol(rpc)]
        interface IForwarder {
            function getNonce(address from) external view returns (uint256);
            function execute(ForwardRequest calldata req, bytes calldata signature)
                external
                payable
                returns (bool, bytes memory);
        }
    }
}

pub use abi::IForwarder;

/// An action a user asks the relay to perform on their behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub value: U256,
    /// Gas budget for the inner call.
    pub gas: u64,
    pub nonce: U256,
    #[serde(default)]
    pub data: Bytes,
}

impl From<&ForwardRequest> for abi::ForwardRequest {
    fn from(req: &ForwardRequest) -> Self {
        abi::ForwardRequest {
            from: req.from,
            to: req.to,
            value: req.value,
            gas: U256::from(req.gas),
            nonce: req.nonce,
            data: req.data.clone(),
        }
    }
}

/// Domain separator inputs for a deployed forwarder.
#[derive(Debug, Clone)]
pub struct ForwarderDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub forwarder: Address,
}

impl ForwarderDomain {
    pub fn eip712(&self) -> Eip712Domain {
        eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.forwarder,
        }
    }

    /// The 32-byte digest a sender signs for `request`.
    pub fn signing_hash(&self, request: &ForwardRequest) -> B256 {
        abi::ForwardRequest::from(request).eip712_signing_hash(&self.eip712())
    }
}

/// ABI-encoded `execute(req, signature)` calldata for the forwarder.
pub fn execute_calldata(request: &ForwardRequest, signature: &Bytes) -> Bytes {
    IForwarder::executeCall {
        req: request.into(),
        signature: signature.clone(),
    }
    .abi_encode()
    .into()
}

/// Decode `execute` calldata back into its request and signature.
pub fn decode_execute_calldata(input: &[u8]) -> Option<(ForwardRequest, Bytes)> {
    let call = IForwarder::executeCall::abi_decode(input).ok()?;
    let gas = u64::try_from(call.req.gas).ok()?;
    Some((
        ForwardRequest {
            from: call.req.from,
            to: call.req.to,
            value: call.req.value,
            gas,
            nonce: call.req.nonce,
            data: call.req.data,
        },
        call.signature,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, bytes, keccak256};

    fn domain() -> ForwarderDomain {
        ForwarderDomain {
            name: "MinimalForwarder".into(),
            version: "0.0.1".into(),
            chain_id: 31337,
            forwarder: address!("0x5FbDB2315678afecb367f032d93F642f64180aa3"),
        }
    }

    fn request() -> ForwardRequest {
        ForwardRequest {
            from: address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            to: address!("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"),
            value: U256::ZERO,
            gas: 100_000,
            nonce: U256::ZERO,
            data: bytes!("abc123"),
        }
    }

    #[test]
    fn test_type_hash_matches_forwarder_definition() {
        let expected = keccak256(
            "ForwardRequest(address from,address to,uint256 value,uint256 gas,uint256 nonce,bytes data)",
        );
        assert_eq!(abi::ForwardRequest::from(&request()).eip712_type_hash(), expected);
    }

    #[test]
    fn test_signing_hash_depends_on_domain() {
        let d = domain();
        let mut other_chain = domain();
        other_chain.chain_id = 1;
        let mut other_forwarder = domain();
        other_forwarder.forwarder = Address::repeat_byte(0x42);

        let h = d.signing_hash(&request());
        assert_ne!(h, other_chain.signing_hash(&request()));
        assert_ne!(h, other_forwarder.signing_hash(&request()));
        assert_eq!(h, d.signing_hash(&request()));
    }

    #[test]
    fn test_execute_calldata_decodes_to_same_request() {
        let sig = Bytes::from(vec![7u8; 65]);
        let calldata = execute_calldata(&request(), &sig);
        assert_eq!(&calldata[..4], IForwarder::executeCall::SELECTOR.as_slice());
        let (decoded, decoded_sig) = decode_execute_calldata(&calldata).unwrap();
        assert_eq!(decoded, request());
        assert_eq!(decoded_sig, sig);
    }

    #[test]
    fn test_request_json_shape() {
        let json = serde_json::json!({
            "from": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            "to": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512",
            "value": "0x0",
            "gas": 100000,
            "nonce": "0x0",
            "data": "0xabc123"
        });
        let parsed: ForwardRequest = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, request());
    }
}
