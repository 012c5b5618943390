// Wallet, EIP-712 and request signing shared by the venue clients.
// Both venues run forks of the same CTF exchange, so their orders share one
// struct and differ only in domain and amount precision.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::types::{Address, TransactionRequest, H256, U256};
use ethers::utils::to_checksum;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

/// Load a wallet from a hex private key, bound to `chain_id`.
pub fn parse_wallet(private_key: &str, chain_id: u64) -> Result<LocalWallet> {
    let wallet: LocalWallet = private_key
        .trim()
        .parse()
        .context("Invalid private key format. Must be hex string starting with 0x")?;
    Ok(wallet.with_chain_id(chain_id))
}

pub fn parse_address(address: &str) -> Result<Address> {
    address
        .trim()
        .parse()
        .with_context(|| format!("Invalid address: {}", address))
}

pub fn checksum(address: Address) -> String {
    to_checksum(&address, None)
}

/// EIP-712 domain of a CTF exchange deployment.
#[derive(Debug, Clone)]
pub struct ExchangeDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderSide {
    #[serde(rename = "BUY")]
    Buy = 0,
    #[serde(rename = "SELL")]
    Sell = 1,
}

/// Unsigned CTF exchange order. Amounts are in the venue's base units.
#[derive(Debug, Clone)]
pub struct CtfOrder {
    pub salt: u64,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u32,
    pub side: OrderSide,
    pub signature_type: u8,
}

#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub order: CtfOrder,
    /// 0x-prefixed EIP-712 digest.
    pub hash: String,
    /// 0x-prefixed 65-byte signature.
    pub signature: String,
}

pub fn order_typed_data(domain: &ExchangeDomain, order: &CtfOrder) -> Result<TypedData> {
    let value = json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            "Order": [
                { "name": "salt", "type": "uint256" },
                { "name": "maker", "type": "address" },
                { "name": "signer", "type": "address" },
                { "name": "taker", "type": "address" },
                { "name": "tokenId", "type": "uint256" },
                { "name": "makerAmount", "type": "uint256" },
                { "name": "takerAmount", "type": "uint256" },
                { "name": "expiration", "type": "uint256" },
                { "name": "nonce", "type": "uint256" },
                { "name": "feeRateBps", "type": "uint256" },
                { "name": "side", "type": "uint8" },
                { "name": "signatureType", "type": "uint8" }
            ]
        },
        "primaryType": "Order",
        "domain": {
            "name": domain.name,
            "version": domain.version,
            "chainId": domain.chain_id,
            "verifyingContract": checksum(domain.verifying_contract)
        },
        "message": {
            "salt": order.salt.to_string(),
            "maker": checksum(order.maker),
            "signer": checksum(order.signer),
            "taker": checksum(order.taker),
            "tokenId": order.token_id.to_string(),
            "makerAmount": order.maker_amount.to_string(),
            "takerAmount": order.taker_amount.to_string(),
            "expiration": order.expiration.to_string(),
            "nonce": order.nonce.to_string(),
            "feeRateBps": order.fee_rate_bps.to_string(),
            "side": order.side as u8,
            "signatureType": order.signature_type
        }
    });

    serde_json::from_value(value).context("Failed to build order typed data")
}

pub async fn sign_order(wallet: &LocalWallet, domain: &ExchangeDomain, order: CtfOrder) -> Result<SignedOrder> {
    let typed_data = order_typed_data(domain, &order)?;
    let digest = typed_data
        .encode_eip712()
        .map_err(|e| anyhow!("Failed to hash order: {}", e))?;
    let signature = wallet
        .sign_typed_data(&typed_data)
        .await
        .context("Failed to sign order")?;

    Ok(SignedOrder {
        order,
        hash: format!("{:?}", H256::from(digest)),
        signature: format!("0x{}", signature),
    })
}

/// `ClobAuth` typed data used to derive Polymarket API keys (L1 auth).
pub fn clob_auth_typed_data(address: Address, timestamp: i64, nonce: u64, chain_id: u64) -> Result<TypedData> {
    let value = json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" }
            ],
            "ClobAuth": [
                { "name": "address", "type": "address" },
                { "name": "timestamp", "type": "string" },
                { "name": "nonce", "type": "uint256" },
                { "name": "message", "type": "string" }
            ]
        },
        "primaryType": "ClobAuth",
        "domain": {
            "name": "ClobAuthDomain",
            "version": "1",
            "chainId": chain_id
        },
        "message": {
            "address": checksum(address),
            "timestamp": timestamp.to_string(),
            "nonce": nonce.to_string(),
            "message": CLOB_AUTH_MESSAGE
        }
    });

    serde_json::from_value(value).context("Failed to build ClobAuth typed data")
}

pub async fn sign_clob_auth(wallet: &LocalWallet, timestamp: i64, nonce: u64) -> Result<String> {
    let typed_data = clob_auth_typed_data(wallet.address(), timestamp, nonce, wallet.chain_id())?;
    let signature = wallet
        .sign_typed_data(&typed_data)
        .await
        .context("Failed to sign ClobAuth message")?;
    Ok(format!("0x{}", signature))
}

/// Plain EIP-191 personal signature, 0x-prefixed.
pub async fn sign_message(wallet: &LocalWallet, message: &str) -> Result<String> {
    let signature = wallet
        .sign_message(message)
        .await
        .context("Failed to sign message")?;
    Ok(format!("0x{}", signature))
}

/// Polymarket L2 request signature: URL-safe base64 HMAC-SHA256 over
/// `timestamp + method + path + body` keyed with the decoded API secret.
pub fn l2_signature(secret: &str, timestamp: i64, method: &str, path: &str, body: Option<&str>) -> Result<String> {
    let key = URL_SAFE
        .decode(secret.trim())
        .context("API secret is not valid URL-safe base64")?;

    let mut message = format!("{}{}{}", timestamp, method, path);
    if let Some(body) = body {
        message.push_str(body);
    }

    let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(message.as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Convert a decimal amount to integer base units. Precision beyond six
/// decimals is rounded away.
pub fn to_base_units(amount: f64, decimals: u32) -> U256 {
    let micros = (amount.max(0.0) * 1e6).round() as u128;
    if decimals >= 6 {
        U256::from(micros) * U256::exp10((decimals - 6) as usize)
    } else {
        U256::from(micros) / U256::exp10((6 - decimals) as usize)
    }
}

pub fn from_base_units(amount: U256, decimals: u32) -> f64 {
    let scale = U256::exp10(decimals as usize);
    let whole = amount / scale;
    let fraction = amount % scale;
    whole.low_u128() as f64 + fraction.low_u128() as f64 / 10f64.powi(decimals as i32)
}

/// Parse a decimal base-unit string as returned by venue APIs.
pub fn parse_base_units(amount: &str, decimals: u32) -> Result<f64> {
    let value = U256::from_dec_str(amount.trim()).with_context(|| format!("Invalid amount: {}", amount))?;
    Ok(from_base_units(value, decimals))
}

/// Maker (collateral paid) and taker (shares received) amounts of a buy.
pub fn buy_amounts(price: f64, size: f64, decimals: u32) -> (U256, U256) {
    let shares = (size * 100.0).floor() / 100.0;
    let cost = (shares * price * 10_000.0).round() / 10_000.0;
    (to_base_units(cost, decimals), to_base_units(shares, decimals))
}

/// Salt that fits a JSON number without precision loss.
pub fn order_salt() -> u64 {
    (uuid::Uuid::new_v4().as_u128() as u64) & ((1u64 << 53) - 1)
}

/// ERC-20 `balanceOf(owner)`, scaled by `decimals`.
pub async fn erc20_balance(provider: &Provider<Http>, token: Address, owner: Address, decimals: u32) -> Result<f64> {
    // balanceOf(address) selector
    let mut data = vec![0x70, 0xa0, 0x82, 0x31];
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(owner.as_bytes());
    data.extend_from_slice(&padded);

    let result = provider
        .call(&TransactionRequest::new().to(token).data(data).into(), None)
        .await
        .context("Failed to call balanceOf")?;

    if result.len() < 32 {
        return Err(anyhow!("Invalid balanceOf response from token contract"));
    }
    Ok(from_base_units(U256::from_big_endian(&result[..32]), decimals))
}
