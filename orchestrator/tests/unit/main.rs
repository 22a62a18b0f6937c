mod test_controller;
mod test_fsm;
mod test_runner;
mod test_server;
