// MySQL implementations of the database collaborators.
//
// Never log passwords; connection failures carry a user-facing message plus masked internals.

pub mod connection;
pub mod provisioning;

pub use connection::MySqlGateway;
pub use provisioning::MySqlAdminProvisioner;
