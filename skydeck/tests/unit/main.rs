mod test_broadcaster;
mod test_builder;
mod test_dispatcher;
mod test_router;
