//! Level files exchanged with the file-organization and plotting collaborators.

pub mod profile_file;

pub use profile_file::{read_profile_file, write_profile_file, LevelFiles, ProfileHeader, ProfileTable};
