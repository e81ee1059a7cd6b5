mod concurrency;
mod mock_store;
mod settlement_flow;
mod sqlite_flow;
