pub mod jwks;
pub mod jwt;
pub mod middleware;
pub mod seats;
