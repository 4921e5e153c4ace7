pub mod packet;
pub mod topic;
