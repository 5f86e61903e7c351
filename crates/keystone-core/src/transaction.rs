//! Actions, transactions, and their signed envelopes.
//!
//! A transaction's id is the Blake3 hash of its canonical encoding and does
//! not cover signatures. Signatures are made over
//! `Blake3(chain_id || canonical bytes)`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::canonical_transaction_bytes;
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, Result};
use crate::types::{AccountName, ActionName, PermissionLevel, TimePoint, TransactionId};

/// A single invocation of a contract action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: AccountName,
    pub name: ActionName,
    pub authorization: Vec<PermissionLevel>,
    #[serde(with = "serde_bytes_vec")]
    pub data: Vec<u8>,
}

impl Action {
    /// Build an action whose data is the CBOR encoding of `payload`.
    pub fn new<T: Serialize>(
        account: AccountName,
        name: ActionName,
        authorization: Vec<PermissionLevel>,
        payload: &T,
    ) -> Result<Self> {
        let mut data = Vec::new();
        ciborium::into_writer(payload, &mut data)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(Self::raw(account, name, authorization, data))
    }

    /// Build an action from already-encoded data.
    pub fn raw(
        account: AccountName,
        name: ActionName,
        authorization: Vec<PermissionLevel>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            account,
            name,
            authorization,
            data,
        }
    }

    /// Decode the action data as `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        ciborium::from_reader(&self.data[..]).map_err(|e| {
            CoreError::DecodingError(format!("{}::{} data: {e}", self.account, self.name))
        })
    }
}

/// An ordered list of actions with an expiration and a committed delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub expiration: TimePoint,
    pub delay_sec: u32,
    pub actions: Vec<Action>,
}

impl Transaction {
    pub fn new(expiration: TimePoint, actions: Vec<Action>) -> Self {
        Self {
            expiration,
            delay_sec: 0,
            actions,
        }
    }

    pub fn with_delay(mut self, delay_sec: u32) -> Self {
        self.delay_sec = delay_sec;
        self
    }

    /// Canonical encoding, excluding signatures.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_transaction_bytes(self)
    }

    /// Deterministic id: Blake3 of the canonical encoding.
    pub fn id(&self) -> TransactionId {
        TransactionId::from_bytes(Blake3Hash::hash(&self.canonical_bytes()).0)
    }

    /// The digest every signature on this transaction commits to.
    pub fn signing_digest(&self, chain_id: &Blake3Hash) -> Blake3Hash {
        Blake3Hash::hash_parts(&[chain_id.as_bytes(), &self.canonical_bytes()])
    }

    /// The actor of the first authorization of the first action.
    pub fn first_authorizer(&self) -> Option<AccountName> {
        self.actions
            .first()
            .and_then(|action| action.authorization.first())
            .map(|level| level.actor)
    }

    /// Structural checks that do not depend on chain state.
    pub fn validate_structure(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(CoreError::MalformedTransaction(
                "transaction has no actions".into(),
            ));
        }
        if let Some(action) = self.actions.iter().find(|a| a.authorization.is_empty()) {
            return Err(CoreError::MalformedTransaction(format!(
                "action {}::{} declares no authorization",
                action.account, action.name
            )));
        }
        Ok(())
    }

    /// Sign with every keypair and wrap in a [`SignedTransaction`].
    pub fn sign(self, keypairs: &[&Keypair], chain_id: &Blake3Hash) -> SignedTransaction {
        let mut signed = SignedTransaction::unsigned(self);
        for keypair in keypairs {
            signed.sign(keypair, chain_id);
        }
        signed
    }
}

/// A public key and its signature over the transaction's signing digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

/// A transaction together with the signatures provided for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<SignatureEntry>,
}

impl SignedTransaction {
    pub fn unsigned(transaction: Transaction) -> Self {
        Self {
            transaction,
            signatures: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    /// Append a signature from `keypair`.
    pub fn sign(&mut self, keypair: &Keypair, chain_id: &Blake3Hash) {
        let digest = self.transaction.signing_digest(chain_id);
        self.signatures.push(SignatureEntry {
            key: keypair.public_key(),
            signature: keypair.sign(digest.as_bytes()),
        });
    }

    /// Verify every signature and return the set of signing keys.
    ///
    /// Fails on the first invalid signature or on a key that signed twice.
    pub fn recover_keys(&self, chain_id: &Blake3Hash) -> Result<BTreeSet<Ed25519PublicKey>> {
        let digest = self.transaction.signing_digest(chain_id);
        let mut keys = BTreeSet::new();
        for entry in &self.signatures {
            entry.key.verify(digest.as_bytes(), &entry.signature)?;
            if !keys.insert(entry.key) {
                return Err(CoreError::MalformedTransaction(format!(
                    "duplicate signature from key {}",
                    entry.key
                )));
            }
        }
        Ok(keys)
    }

    /// Serialize to CBOR bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Serde adapter writing `Vec<u8>` as a CBOR byte string rather than an array.
mod serde_bytes_vec {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(byte) = seq.next_element()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{names, Name};

    fn chain_id() -> Blake3Hash {
        Blake3Hash::hash(b"test-chain")
    }

    fn transfer(actor: &str) -> Action {
        Action::raw(
            Name::from_static("token"),
            Name::from_static("transfer"),
            vec![PermissionLevel::new(actor.parse().unwrap(), names::ACTIVE)],
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_id_ignores_signatures() {
        let trx = Transaction::new(TimePoint::from_secs(60), vec![transfer("alice")]);
        let id = trx.id();
        let kp = Keypair::from_label("alice@active");
        let signed = trx.sign(&[&kp], &chain_id());
        assert_eq!(signed.id(), id);
    }

    #[test]
    fn test_recover_keys() {
        let kp1 = Keypair::from_label("alice@active");
        let kp2 = Keypair::from_label("bob@active");
        let signed = Transaction::new(TimePoint::from_secs(60), vec![transfer("alice")])
            .sign(&[&kp1, &kp2], &chain_id());

        let keys = signed.recover_keys(&chain_id()).unwrap();
        assert!(keys.contains(&kp1.public_key()));
        assert!(keys.contains(&kp2.public_key()));
    }

    #[test]
    fn test_wrong_chain_rejected() {
        let kp = Keypair::from_label("alice@active");
        let signed = Transaction::new(TimePoint::from_secs(60), vec![transfer("alice")])
            .sign(&[&kp], &chain_id());
        let other = Blake3Hash::hash(b"other-chain");
        assert!(matches!(
            signed.recover_keys(&other),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let kp = Keypair::from_label("alice@active");
        let signed = Transaction::new(TimePoint::from_secs(60), vec![transfer("alice")])
            .sign(&[&kp, &kp], &chain_id());
        let err = signed.recover_keys(&chain_id()).unwrap_err();
        assert!(err.to_string().contains("duplicate signature"));
    }

    #[test]
    fn test_first_authorizer() {
        let trx = Transaction::new(
            TimePoint::from_secs(60),
            vec![transfer("carol"), transfer("alice")],
        );
        assert_eq!(trx.first_authorizer(), Some(Name::from_static("carol")));
    }

    #[test]
    fn test_validate_structure() {
        let empty = Transaction::new(TimePoint::from_secs(60), vec![]);
        assert!(empty.validate_structure().is_err());

        let mut unauthorized = transfer("alice");
        unauthorized.authorization.clear();
        let trx = Transaction::new(TimePoint::from_secs(60), vec![unauthorized]);
        assert!(trx.validate_structure().is_err());
    }

    #[test]
    fn test_signed_bytes_roundtrip() {
        let kp = Keypair::from_label("alice@active");
        let signed = Transaction::new(TimePoint::from_secs(60), vec![transfer("alice")])
            .with_delay(10)
            .sign(&[&kp], &chain_id());
        let back = SignedTransaction::from_bytes(&signed.to_bytes().unwrap()).unwrap();
        assert_eq!(back, signed);
        assert_eq!(back.id(), signed.id());
    }

    #[test]
    fn test_action_payload_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Memo {
            text: String,
        }
        let memo = Memo {
            text: "hi".into(),
        };
        let action = Action::new(
            Name::from_static("token"),
            Name::from_static("memo"),
            vec![],
            &memo,
        )
        .unwrap();
        assert_eq!(action.data_as::<Memo>().unwrap(), memo);
    }
}
