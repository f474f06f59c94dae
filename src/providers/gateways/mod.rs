pub mod bankwire;
pub mod lunapay;
pub mod novapays;
pub mod orientpay;
pub mod swiftpace;
pub mod tetherlink;

pub use bankwire::{BankWireConfig, BankWireGateway};
pub use lunapay::{LunaPayConfig, LunaPayGateway};
pub use novapays::{NovaPaysConfig, NovaPaysGateway};
pub use orientpay::{OrientPayConfig, OrientPayGateway};
pub use swiftpace::{SwiftPaceConfig, SwiftPaceGateway};
pub use tetherlink::{TetherLinkConfig, TetherLinkGateway};
