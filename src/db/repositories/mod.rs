mod items;
mod kv;
mod proofs;
