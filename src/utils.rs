pub mod display_info;
