mod rig;

mod coordinated_move;
mod emergency;
mod planner_properties;
mod protocol_chain;
mod safety_stop;
mod watchdog;
