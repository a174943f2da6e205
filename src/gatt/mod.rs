//! GATT surface: attribute table declaration and access dispatch.

pub mod dispatch;
pub mod table;

pub use dispatch::{AttValue, ReadView, RpcSink};
pub use table::{
    build_attribute_table, Access, AttributeTable, CharacteristicDef, CharacteristicId,
    HandleTable, Properties, ServiceDef, Uuid,
};
