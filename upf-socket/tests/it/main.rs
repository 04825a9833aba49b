mod reqrep;
