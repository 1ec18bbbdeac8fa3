mod sim_driver;
