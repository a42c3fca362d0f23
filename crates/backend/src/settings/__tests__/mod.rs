mod helpers;
mod layering;
mod store;
