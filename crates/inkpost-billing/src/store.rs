use inkpost_ledger::{LedgerReader, LedgerWriter, OrderBook};

/// Everything the workflows need from the ledger, as one object.
pub trait LedgerStore: LedgerWriter + LedgerReader + OrderBook {}

impl<T: LedgerWriter + LedgerReader + OrderBook> LedgerStore for T {}
