mod fusion;
mod loops;
mod tiling;
