//! Assets: registered things the ledger tracks.

pub mod asset;

pub use asset::{
    Asset, AssetCommand, AssetEvent, AssetId, AssetStatus, RegisterAsset, RetireAsset,
    TransferOwnership, UpdateProperties,
};
