mod common;

mod lifecycle;
mod routing;
