//! Resource cache identity and use tracking
//!
//! A resource cache is the result of fetching one version of a resource
//! with particular params. Its identity is content-addressed: the config
//! (resource type origin + source) plus version plus params hash. Custom
//! resource types make this recursive, since the image a custom type runs
//! in is itself a cache of its parent type.
//!
//! Every cache and config stays alive while it has at least one use. Uses
//! are owned by a build, a resource or a resource type, and are deleted
//! by the sweeps in [`crate::gc`] once the owner no longer needs them.

pub mod factory;
pub mod identity;
pub mod user;

pub use factory::{DbResourceCacheFactory, ResourceCacheFactory, ResourceConfigFactory};
pub use identity::{
    ConfigOrigin, ResourceCacheDescriptor, ResourceConfigDescriptor, UsedBaseResourceType,
    UsedConfigOrigin, UsedResourceCache, UsedResourceConfig,
};
pub use user::ResourceUser;
