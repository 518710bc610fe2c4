use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a bucket: a sub-ledger partition of the shared reserve.
///
/// `C0` is the base bucket backing Doc and BPro. Every other id names a
/// leveraged bucket issuing its own BProx token.
///
/// # Examples
///
/// ```
/// use collateral_engine::core::token::BucketId;
///
/// let x2 = BucketId::new("X2");
/// assert!(!x2.is_base());
/// assert!(BucketId::c0().is_base());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    pub const BASE: &'static str = "C0";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The base bucket.
    pub fn c0() -> Self {
        Self::new(Self::BASE)
    }

    pub fn is_base(&self) -> bool {
        self.0 == Self::BASE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BucketId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Tokens issued against the reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenKind {
    /// Stable-value token, a liability of the reserve.
    Doc,
    /// Risk/equity token absorbing price volatility.
    BPro,
    /// Leveraged token, scoped to a leveraged bucket.
    BProx,
}

impl TokenKind {
    /// Whether the token lives in a named leveraged bucket.
    pub fn is_bucket_scoped(self) -> bool {
        matches!(self, TokenKind::BProx)
    }

    /// The operation kind used for fee lookup when minting this token.
    pub fn mint_operation(self) -> OperationKind {
        match self {
            TokenKind::Doc => OperationKind::MintDoc,
            TokenKind::BPro => OperationKind::MintBPro,
            TokenKind::BProx => OperationKind::MintBProx,
        }
    }

    /// The operation kind used for fee lookup when redeeming this token immediately.
    pub fn redeem_operation(self) -> OperationKind {
        match self {
            TokenKind::Doc => OperationKind::RedeemFreeDoc,
            TokenKind::BPro => OperationKind::RedeemBPro,
            TokenKind::BProx => OperationKind::RedeemBProx,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Doc => "DOC",
            TokenKind::BPro => "BPRO",
            TokenKind::BProx => "BPROX",
        };
        write!(f, "{}", name)
    }
}

/// Every operation that moves reserve, keyed for commission lookup and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    MintBPro,
    RedeemBPro,
    MintDoc,
    RedeemFreeDoc,
    SettlementRedeemDoc,
    MintBProx,
    RedeemBProx,
    RedeemAllDoc,
}

impl OperationKind {
    pub fn is_mint(self) -> bool {
        matches!(
            self,
            OperationKind::MintBPro | OperationKind::MintDoc | OperationKind::MintBProx
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
