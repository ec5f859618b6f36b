pub mod mock_port;
pub mod temp;
