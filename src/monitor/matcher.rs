//! Transfer Matcher
//!
//! Pure decision functions shared by both transports. Nothing here performs
//! I/O or mutates the session; stopping after the first hit is the caller's
//! job.

use num_bigint::BigUint;

use super::abi::{decode_transfer, is_empty_input, parse_hex_quantity};
use super::frame::PendingTransaction;
use super::types::{PaymentAsset, PaymentRequest, TransferCandidate, TransferCategory, same_address};

/// Matching predicate derived from a [`PaymentRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedPayment {
    /// Lowercase
    pub recipient: String,
    pub asset: PaymentAsset,
    pub amount: BigUint,
}

impl ExpectedPayment {
    pub fn new(recipient: &str, asset: PaymentAsset, amount: BigUint) -> Self {
        Self {
            recipient: recipient.to_ascii_lowercase(),
            asset,
            amount,
        }
    }

    pub fn from_request(request: &PaymentRequest) -> Self {
        Self::new(
            &request.recipient_address,
            PaymentAsset::from_token_address(&request.token_address),
            request.expected_amount.clone(),
        )
    }

    /// Exact-amount match, no tolerance.
    pub fn matches(&self, candidate: &TransferCandidate) -> bool {
        if !same_address(&candidate.to, &self.recipient) || candidate.value_raw != self.amount {
            return false;
        }

        if candidate.category != self.asset.category() {
            return false;
        }
        match self.asset.contract() {
            None => true,
            Some(contract) => candidate
                .contract_address
                .as_deref()
                .is_some_and(|c| same_address(c, contract)),
        }
    }

    /// Turn a raw pending transaction into a candidate.
    ///
    /// Empty call data sent to the recipient is a native transfer regardless
    /// of the session asset. Call data sent to the session's token contract
    /// is decoded as ERC-20 `transfer`. Everything else, including any field
    /// that fails to decode, yields `None`.
    pub fn candidate_from_pending(&self, tx: &PendingTransaction) -> Option<TransferCandidate> {
        let to = tx.to.as_deref()?;
        let from = tx.from.clone().unwrap_or_default();

        if is_empty_input(tx.input.as_deref()) {
            if !same_address(to, &self.recipient) {
                return None;
            }
            let value_raw = match tx.value.as_deref() {
                Some(value) => parse_hex_quantity(value)?,
                None => BigUint::default(),
            };
            return Some(TransferCandidate {
                hash: tx.hash.clone(),
                from,
                to: to.to_string(),
                value_raw,
                category: TransferCategory::Native,
                contract_address: None,
            });
        }

        let contract = self.asset.contract()?;
        if !same_address(to, contract) {
            return None;
        }
        let call = decode_transfer(tx.input.as_deref()?)?;
        Some(TransferCandidate {
            hash: tx.hash.clone(),
            from,
            to: call.recipient,
            value_raw: call.amount,
            category: TransferCategory::Erc20,
            contract_address: Some(to.to_string()),
        })
    }

    /// Decode and match in one step.
    pub fn match_pending(&self, tx: &PendingTransaction) -> Option<TransferCandidate> {
        self.candidate_from_pending(tx)
            .filter(|candidate| self.matches(candidate))
    }

    /// First matching candidate wins.
    pub fn first_match<'a, I>(&self, candidates: I) -> Option<TransferCandidate>
    where
        I: IntoIterator<Item = &'a TransferCandidate>,
    {
        candidates.into_iter().find(|c| self.matches(c)).cloned()
    }
}
