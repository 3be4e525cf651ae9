pub mod capture;
pub mod helpers;
pub mod mock_dispatcher;
