//! Test fixtures and helpers.
//!
//! [`TestChain`] wraps an [`Engine`] with the token contract installed and
//! deterministic keys: the key of `alice@active` is always
//! `Keypair::from_label("alice@active")`.

use keystone::{BlockSummary, Engine, EngineConfig, Result, TransactionTrace};
use keystone_core::{
    AccountName, Action, Authority, CancelDelay, DeleteAuth, Keypair, LinkAuth, Name,
    PermissionLevel, SignedTransaction, SystemPayload, TimePoint, Transaction, TransactionId,
    UnlinkAuth, UpdateAuth,
};
use keystone_store::{MemoryStore, StateStore};

use crate::token;

/// Time of the genesis block.
pub const GENESIS_TIME: TimePoint = TimePoint::from_secs(1_000_000);

/// How long pushed transactions stay valid, in seconds.
pub const TRX_LIFETIME: u32 = 60;

/// The deterministic key for `account@permission`.
pub fn key_for(account: &str, permission: &str) -> Keypair {
    Keypair::from_label(&format!("{account}@{permission}"))
}

pub fn level(actor: &str, permission: &str) -> Result<PermissionLevel> {
    Ok(PermissionLevel::new(actor.parse()?, permission.parse()?))
}

/// An engine that produces one block per pushed transaction, one second
/// apart unless told otherwise.
pub struct TestChain<S: StateStore = MemoryStore> {
    pub engine: Engine<S>,
}

impl TestChain<MemoryStore> {
    /// In-memory chain with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        TestChain::with_store(MemoryStore::new(), config)
    }
}

impl<S: StateStore> TestChain<S> {
    /// Chain over `store`; creates the `token` account and the genesis block.
    pub fn with_store(store: S, config: EngineConfig) -> Result<Self> {
        let engine = token::install(Engine::new(store, config)?);
        let mut chain = Self { engine };
        chain.create_account("token")?;
        chain.engine.produce_block(GENESIS_TIME)?;
        Ok(chain)
    }

    pub fn head_time(&self) -> TimePoint {
        self.engine.head_time().unwrap_or(GENESIS_TIME)
    }

    /// Genesis-create `name` with `name@owner` and `name@active` keys.
    pub fn create_account(&mut self, name: &str) -> Result<AccountName> {
        let account: AccountName = name.parse()?;
        self.engine.create_account(
            account,
            Authority::from_key(key_for(name, "owner").public_key(), 0),
            Authority::from_key(key_for(name, "active").public_key(), 0),
        )?;
        Ok(account)
    }

    pub fn create_accounts(&mut self, names: &[&str]) -> Result<Vec<AccountName>> {
        names.iter().map(|name| self.create_account(name)).collect()
    }

    /// Produce an empty block `secs` after the head block.
    pub fn advance(&mut self, secs: u32) -> Result<BlockSummary> {
        let time = self.head_time().plus_secs(secs);
        self.engine.produce_block(time)
    }

    pub fn produce_block(&mut self) -> Result<BlockSummary> {
        self.advance(1)
    }

    /// A transaction expiring [`TRX_LIFETIME`] after the next block.
    pub fn transaction(&self, actions: Vec<Action>, delay_sec: u32) -> Transaction {
        let expiration = self.head_time().plus_secs(1 + TRX_LIFETIME);
        Transaction::new(expiration, actions).with_delay(delay_sec)
    }

    pub fn sign(&self, trx: Transaction, signers: &[&Keypair]) -> SignedTransaction {
        trx.sign(signers, &self.engine.config().chain_id)
    }

    /// Push `trx` in a block of its own, one second after the head block.
    pub fn push_signed(&mut self, trx: &SignedTransaction) -> Result<TransactionTrace> {
        let time = self.head_time().plus_secs(1);
        self.engine.start_block(time)?;
        let result = self.engine.push_transaction(trx);
        self.engine.finalize_block()?;
        result
    }

    pub fn push(
        &mut self,
        actions: Vec<Action>,
        signers: &[&Keypair],
        delay_sec: u32,
    ) -> Result<TransactionTrace> {
        let trx = self.sign(self.transaction(actions, delay_sec), signers);
        self.push_signed(&trx)
    }

    /// Push a single system action declared and signed by `account@signer`.
    fn push_system<P: SystemPayload>(
        &mut self,
        payload: &P,
        account: &str,
        signer: &str,
        delay_sec: u32,
    ) -> Result<TransactionTrace> {
        let action = payload.into_action(vec![level(account, signer)?])?;
        self.push(vec![action], &[&key_for(account, signer)], delay_sec)
    }

    /// Create or update `account@permission` under `parent`.
    pub fn updateauth(
        &mut self,
        account: &str,
        permission: &str,
        parent: &str,
        auth: Authority,
        signer: &str,
    ) -> Result<TransactionTrace> {
        let parent = if parent.is_empty() {
            Name::EMPTY
        } else {
            parent.parse()?
        };
        let update = UpdateAuth {
            account: account.parse()?,
            permission: permission.parse()?,
            parent,
            auth,
        };
        self.push_system(&update, account, signer, 0)
    }

    /// Create `account@permission` under `parent`, guarded by its
    /// deterministic key and an optional wait.
    pub fn create_permission(
        &mut self,
        account: &str,
        permission: &str,
        parent: &str,
        delay_sec: u32,
    ) -> Result<TransactionTrace> {
        let auth = Authority::from_key(key_for(account, permission).public_key(), delay_sec);
        self.updateauth(account, permission, parent, auth, parent)
    }

    pub fn deleteauth(
        &mut self,
        account: &str,
        permission: &str,
        signer: &str,
    ) -> Result<TransactionTrace> {
        let delete = DeleteAuth {
            account: account.parse()?,
            permission: permission.parse()?,
        };
        self.push_system(&delete, account, signer, 0)
    }

    pub fn linkauth(
        &mut self,
        account: &str,
        code: &str,
        action: &str,
        requirement: &str,
        signer: &str,
    ) -> Result<TransactionTrace> {
        let link = LinkAuth {
            account: account.parse()?,
            code: code.parse()?,
            message_type: parse_or_empty(action)?,
            requirement: requirement.parse()?,
        };
        self.push_system(&link, account, signer, 0)
    }

    pub fn unlinkauth(
        &mut self,
        account: &str,
        code: &str,
        action: &str,
        signer: &str,
    ) -> Result<TransactionTrace> {
        let unlink = UnlinkAuth {
            account: account.parse()?,
            code: code.parse()?,
            message_type: parse_or_empty(action)?,
        };
        self.push_system(&unlink, account, signer, 0)
    }

    /// Cancel `trx_id`, naming `account@canceling` as the canceling authority
    /// and signing as `account@signer`.
    pub fn canceldelay(
        &mut self,
        account: &str,
        canceling: &str,
        trx_id: TransactionId,
        signer: &str,
    ) -> Result<TransactionTrace> {
        let cancel = CancelDelay {
            canceling_auth: level(account, canceling)?,
            trx_id,
        };
        self.push_system(&cancel, account, signer, 0)
    }

    pub fn issue(&mut self, to: &str, quantity: u64) -> Result<TransactionTrace> {
        let action = token::issue_action(to.parse()?, quantity, level("token", "active")?)?;
        self.push(vec![action], &[&key_for("token", "active")], 0)
    }

    /// Transfer declared and signed by `from@signer`.
    pub fn transfer(
        &mut self,
        from: &str,
        to: &str,
        quantity: u64,
        signer: &str,
        delay_sec: u32,
    ) -> Result<TransactionTrace> {
        let trx = self.transfer_trx(from, to, quantity, signer, delay_sec)?;
        self.push_signed(&trx)
    }

    /// The signed transaction [`transfer`](Self::transfer) would push.
    pub fn transfer_trx(
        &self,
        from: &str,
        to: &str,
        quantity: u64,
        signer: &str,
        delay_sec: u32,
    ) -> Result<SignedTransaction> {
        let action =
            token::transfer_action(from.parse()?, to.parse()?, quantity, level(from, signer)?)?;
        Ok(self.sign(self.transaction(vec![action], delay_sec), &[&key_for(from, signer)]))
    }

    pub fn balance(&self, account: &str) -> Result<u64> {
        token::balance(&self.engine, account.parse()?)
    }

    /// Whether `account@permission` exists.
    pub fn has_permission(&self, account: &str, permission: &str) -> Result<bool> {
        Ok(self
            .engine
            .get_permission(account.parse()?, permission.parse()?)?
            .is_some())
    }

    /// Deferred transactions sent by `account`.
    pub fn pending_count(&self, account: &str) -> Result<usize> {
        Ok(self.engine.list_pending(account.parse()?)?.len())
    }
}

fn parse_or_empty(s: &str) -> Result<Name> {
    if s.is_empty() {
        Ok(Name::EMPTY)
    } else {
        Ok(s.parse()?)
    }
}
