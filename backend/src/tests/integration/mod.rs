mod api;
mod postgres;
mod races;
